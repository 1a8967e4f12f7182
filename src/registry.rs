//! Registry of active modules.

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::descriptor::{ModuleDescriptor, SwapPolicy};
use crate::error::{Error, Result};
use crate::instance::ModuleInstance;
use crate::lifecycle::LifecycleState;
use crate::loader::ModuleUnit;
use crate::version::Version;

/// Configuration for the module registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of active modules.
    pub max_modules: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_modules: 256 }
    }
}

impl RegistryConfig {
    /// Create a new registry configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of active modules.
    pub fn with_max_modules(mut self, max: usize) -> Self {
        self.max_modules = max;
        self
    }
}

/// An active module: its live instance and the unit it came from.
#[derive(Debug)]
pub struct ActiveModule {
    /// The live instance.
    pub instance: ModuleInstance,
    /// The unit the instance was created from.
    pub unit: ModuleUnit,
    /// Whether the host routes work to the module.
    pub enabled: bool,
}

impl ActiveModule {
    /// Pair a fresh instance with its unit, enabled.
    pub fn new(instance: ModuleInstance, unit: ModuleUnit) -> Self {
        Self {
            instance,
            unit,
            enabled: true,
        }
    }

    /// Get the descriptor.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        self.unit.descriptor()
    }

    fn record(&self) -> ModuleRecord {
        let descriptor = self.descriptor();
        ModuleRecord {
            id: descriptor.id.clone(),
            category: descriptor.category.clone(),
            module_version: descriptor.module_version,
            state: self.instance.state(),
            hot_reload_supported: descriptor.swap_policy == SwapPolicy::RuntimeSwappable,
            generation: self.instance.generation(),
            enabled: self.enabled,
        }
    }
}

/// A module the registry refused, handed back with the reason.
///
/// The module is still live; the caller must shut it down.
#[derive(Debug)]
pub struct Rejected {
    /// Why the module was refused.
    pub error: Error,
    /// The refused module.
    pub module: Box<ActiveModule>,
}

impl From<Rejected> for Error {
    fn from(rejected: Rejected) -> Self {
        rejected.error
    }
}

/// Snapshot of an active module for tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Module id.
    pub id: String,
    /// Module category.
    pub category: String,
    /// Module version.
    pub module_version: Version,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Whether the module can be hot swapped.
    pub hot_reload_supported: bool,
    /// Hot swap count.
    pub generation: u32,
    /// Whether the module is enabled.
    pub enabled: bool,
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Active modules.
    pub total: usize,
    /// Modules in the started state.
    pub started: usize,
    /// Modules that can be hot swapped.
    pub swappable: usize,
    /// Modules currently disabled.
    pub disabled: usize,
    /// Sum of generations across modules.
    pub hot_swaps: u64,
}

/// Registry of active modules, keyed by id.
///
/// Keeps activation order alongside the map so records and shutdown follow
/// the order modules were started in.
pub struct ModuleRegistry {
    config: RegistryConfig,
    modules: DashMap<String, ActiveModule>,
    order: Mutex<Vec<String>>,
}

impl ModuleRegistry {
    /// Create a new module registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            modules: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Get the registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register an active module at the end of the activation order.
    pub fn register(&self, module: ActiveModule) -> std::result::Result<(), Rejected> {
        let position = self.order.lock().len();
        self.insert_at(position, module)
    }

    /// Register an active module at `position` in the activation order.
    ///
    /// Positions past the end append. A refused module is returned in the
    /// error.
    pub fn insert_at(
        &self,
        position: usize,
        module: ActiveModule,
    ) -> std::result::Result<(), Rejected> {
        let id = module.descriptor().id.clone();
        let mut order = self.order.lock();

        let refusal = if self.modules.contains_key(&id) {
            Some(Error::ModuleAlreadyActive(id.clone()))
        } else if order.len() >= self.config.max_modules {
            Some(Error::Registry(format!(
                "registry full: max {} modules",
                self.config.max_modules
            )))
        } else {
            None
        };

        if let Some(error) = refusal {
            return Err(Rejected {
                error,
                module: Box::new(module),
            });
        }

        self.modules.insert(id.clone(), module);
        let len = order.len();
        order.insert(position.min(len), id);

        Ok(())
    }

    /// Remove a module, returning it with its former activation position.
    pub fn remove(&self, id: &str) -> Result<(usize, ActiveModule)> {
        let mut order = self.order.lock();

        let (_, module) = self
            .modules
            .remove(id)
            .ok_or_else(|| Error::module_not_found(id))?;

        let position = order.iter().position(|x| x == id).unwrap_or(order.len());
        if position < order.len() {
            order.remove(position);
        }

        Ok((position, module))
    }

    /// Check if a module is active.
    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    /// Get the number of active modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module ids in activation order.
    pub fn ids(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    /// Descriptors of active modules in activation order.
    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.in_order(|m| m.descriptor().clone())
    }

    /// Get a module's descriptor.
    pub fn descriptor(&self, id: &str) -> Option<ModuleDescriptor> {
        self.modules.get(id).map(|m| m.descriptor().clone())
    }

    /// Get a module's state.
    pub fn state(&self, id: &str) -> Option<LifecycleState> {
        self.modules.get(id).map(|m| m.instance.state())
    }

    /// Active modules that declare a dependency on `id`.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.descriptors()
            .into_iter()
            .filter(|d| d.depends_on(id))
            .map(|d| d.id)
            .collect()
    }

    /// Enable or disable a module.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut module = self
            .modules
            .get_mut(id)
            .ok_or_else(|| Error::module_not_found(id))?;
        module.enabled = enabled;
        Ok(())
    }

    /// Records of active modules in activation order.
    pub fn records(&self) -> Vec<ModuleRecord> {
        self.in_order(ActiveModule::record)
    }

    /// Get a module's record.
    pub fn record(&self, id: &str) -> Option<ModuleRecord> {
        self.modules.get(id).map(|m| m.record())
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total: self.modules.len(),
            ..Default::default()
        };

        for entry in self.modules.iter() {
            if entry.instance.state() == LifecycleState::Started {
                stats.started += 1;
            }
            if entry.descriptor().swap_policy == SwapPolicy::RuntimeSwappable {
                stats.swappable += 1;
            }
            if !entry.enabled {
                stats.disabled += 1;
            }
            stats.hot_swaps += u64::from(entry.instance.generation());
        }

        stats
    }

    fn in_order<T>(&self, f: impl Fn(&ActiveModule) -> T) -> Vec<T> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|id| self.modules.get(id).map(|m| f(m.value())))
            .collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("config", &self.config)
            .field("module_count", &self.modules.len())
            .finish()
    }
}
