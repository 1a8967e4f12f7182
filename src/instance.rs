//! Module instances and their lifecycle transitions.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::abi::OwnedModule;
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleState, LifecycleTransition};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Information about a module instance.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    /// Process-unique instance id.
    pub instance_id: u64,
    /// Descriptor id of the module.
    pub module_id: String,
    /// Number of hot swaps that preceded this instance.
    pub generation: u32,
    /// When the instance was created.
    pub created_at: Instant,
    /// Current lifecycle state.
    pub state: LifecycleState,
}

/// A live module instance driven through its lifecycle by the host.
///
/// Transitions follow `Unloaded -> Loaded -> Started -> Stopped -> Unloaded`.
/// Once unloaded after having run, the instance is retired and only
/// [`destroy`](Self::destroy) remains.
pub struct ModuleInstance {
    info: InstanceInfo,
    module: OwnedModule,
    retired: bool,
}

impl ModuleInstance {
    pub(crate) fn new(module_id: impl Into<String>, generation: u32, module: OwnedModule) -> Self {
        Self {
            info: InstanceInfo {
                instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
                module_id: module_id.into(),
                generation,
                created_at: Instant::now(),
                state: LifecycleState::Unloaded,
            },
            module,
            retired: false,
        }
    }

    /// Get the instance id.
    pub fn instance_id(&self) -> u64 {
        self.info.instance_id
    }

    /// Get the module id.
    pub fn module_id(&self) -> &str {
        &self.info.module_id
    }

    /// Get the generation.
    pub fn generation(&self) -> u32 {
        self.info.generation
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.info.state
    }

    /// Get instance information.
    pub fn info(&self) -> &InstanceInfo {
        &self.info
    }

    /// Check if the instance has been unloaded after running.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Run `on_load`.
    pub fn load(&mut self) -> Result<()> {
        self.apply(LifecycleTransition::Load)
    }

    /// Run `on_start`.
    pub fn start(&mut self) -> Result<()> {
        self.apply(LifecycleTransition::Start)
    }

    /// Run `on_stop`.
    pub fn stop(&mut self) -> Result<()> {
        self.apply(LifecycleTransition::Stop)
    }

    /// Run `on_unload` and retire the instance.
    pub fn unload(&mut self) -> Result<()> {
        self.apply(LifecycleTransition::Unload)
    }

    /// Release the instance through its unit's destroy entry point.
    ///
    /// Allowed from any state.
    pub fn destroy(self) {
        tracing::trace!(
            "Destroying instance {} of module {} in state {}",
            self.info.instance_id,
            self.info.module_id,
            self.info.state
        );
        self.module.destroy();
    }

    fn apply(&mut self, transition: LifecycleTransition) -> Result<()> {
        let expected = transition.required_state().to_string();

        if self.retired {
            return Err(Error::invalid_state(expected, "retired"));
        }

        let next = self
            .info
            .state
            .after(transition)
            .ok_or_else(|| Error::invalid_state(expected, self.info.state.to_string()))?;

        let module = self.module.module_mut();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match transition {
            LifecycleTransition::Load => module.on_load(),
            LifecycleTransition::Start => module.on_start(),
            LifecycleTransition::Stop => module.on_stop(),
            LifecycleTransition::Unload => module.on_unload(),
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(Error::lifecycle_failed(
                    &self.info.module_id,
                    transition.name(),
                    e.to_string(),
                ))
            }
            Err(_) => {
                return Err(Error::lifecycle_failed(
                    &self.info.module_id,
                    transition.name(),
                    "callback panicked",
                ))
            }
        }

        self.info.state = next;
        if transition == LifecycleTransition::Unload {
            self.retired = true;
        }

        tracing::debug!(
            "Module {} (instance {}) is now {}",
            self.info.module_id,
            self.info.instance_id,
            next
        );

        Ok(())
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("instance_id", &self.info.instance_id)
            .field("module_id", &self.info.module_id)
            .field("generation", &self.info.generation)
            .field("state", &self.info.state)
            .field("retired", &self.retired)
            .finish()
    }
}
