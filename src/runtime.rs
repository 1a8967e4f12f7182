//! Module host runtime driving validation, activation and hot swap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::abi::MODULE_API_VERSION;
use crate::descriptor::ModuleDescriptor;
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleEvent, LifecycleHooks, LifecycleState, LifecycleTransition};
use crate::loader::{LoaderConfig, ModuleLoader, ModuleUnit};
use crate::manager::ModuleManager;
use crate::registry::{
    ActiveModule, ModuleRecord, ModuleRegistry, RegistryConfig, RegistryStats, Rejected,
};
use crate::validation::ValidationResult;
use crate::version::Version;

#[cfg(feature = "metrics-prometheus")]
use crate::metrics::ModuleMetrics;

/// Configuration for the module host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Loader configuration.
    pub loader: LoaderConfig,
    /// Registry configuration.
    pub registry: RegistryConfig,
    /// API version descriptors are validated against.
    pub supported_api_version: Version,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            loader: LoaderConfig::default(),
            registry: RegistryConfig::default(),
            supported_api_version: MODULE_API_VERSION,
        }
    }
}

impl HostConfig {
    /// Create a new host configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loader configuration.
    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    /// Set the registry configuration.
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Set the supported API version.
    pub fn with_supported_api_version(mut self, version: Version) -> Self {
        self.supported_api_version = version;
        self
    }
}

/// Hosts module instances: validates batches, starts them in dependency
/// order, swaps swappable modules and tears everything down in reverse.
///
/// The host is `Send + Sync`. Operations are synchronous and run lifecycle
/// callbacks on the calling thread. Activation, hot swap, deactivation and
/// shutdown are serialized, so lifecycle callbacks and event handlers must
/// not call back into them. A hot swap leaves a window in which the swapped
/// id is not active.
pub struct ModuleHost {
    config: HostConfig,
    manager: ModuleManager,
    loader: ModuleLoader,
    registry: ModuleRegistry,
    operation: Mutex<()>,
    hooks: Arc<RwLock<LifecycleHooks>>,
    #[cfg(feature = "metrics-prometheus")]
    metrics: Option<Arc<ModuleMetrics>>,
}

impl ModuleHost {
    /// Create a new module host.
    pub fn new(config: HostConfig) -> Self {
        Self {
            manager: ModuleManager::new(config.supported_api_version),
            loader: ModuleLoader::new(config.loader.clone()),
            registry: ModuleRegistry::new(config.registry.clone()),
            operation: Mutex::new(()),
            hooks: Arc::new(RwLock::new(LifecycleHooks::new())),
            #[cfg(feature = "metrics-prometheus")]
            metrics: None,
            config,
        }
    }

    /// Create with default configuration.
    pub fn default_config() -> Self {
        Self::new(HostConfig::default())
    }

    /// Attach a metrics collector.
    #[cfg(feature = "metrics-prometheus")]
    pub fn with_metrics(mut self, metrics: Arc<ModuleMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the host configuration.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Get the module manager.
    pub fn manager(&self) -> &ModuleManager {
        &self.manager
    }

    /// Get the module loader.
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Get the module registry.
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Add a lifecycle event handler.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.hooks.write().on_event(handler);
    }

    /// Validate a batch together with the modules already active.
    ///
    /// Active descriptors come first, in activation order, so a batch entry
    /// reusing an active id is reported as a duplicate.
    pub fn validate(&self, units: &[ModuleUnit]) -> ValidationResult {
        let mut descriptors = self.registry.descriptors();
        descriptors.extend(units.iter().map(|u| u.descriptor().clone()));
        self.manager.validate(&descriptors)
    }

    /// Validate, create and start a batch of modules.
    ///
    /// Nothing is created when validation fails. Modules are created, loaded
    /// and started in dependency order; if one fails, the modules this call
    /// already started are torn down in reverse order and the error is
    /// returned. Returns the ids in the order they were started.
    pub fn activate(&self, units: Vec<ModuleUnit>) -> Result<Vec<String>> {
        let _operation = self.operation.lock();
        let started_at = Instant::now();

        let validation = self.validate(&units);
        if !validation.ok {
            tracing::warn!(
                "Rejected batch of {} modules: {}",
                units.len(),
                validation.errors.join("; ")
            );
            #[cfg(feature = "metrics-prometheus")]
            self.with_metrics(|m| m.record_validation_failure());
            return validation.into_result().map(|_| Vec::new());
        }

        let capacity = self.registry.config().max_modules;
        if self.registry.len() + units.len() > capacity {
            return Err(Error::Registry(format!(
                "activating {} modules would exceed max {} modules",
                units.len(),
                capacity
            )));
        }

        let mut descriptors = self.registry.descriptors();
        descriptors.extend(units.iter().map(|u| u.descriptor().clone()));
        let order = self.manager.startup_order(&descriptors);

        let mut pending: HashMap<String, ModuleUnit> = units
            .into_iter()
            .map(|u| (u.id().to_string(), u))
            .collect();

        let mut started = Vec::with_capacity(pending.len());

        for id in order {
            let Some(unit) = pending.remove(&id) else {
                continue;
            };

            let result = self
                .bring_up(unit, 0)
                .and_then(|active| self.install(self.registry.register(active)));

            if let Err(e) = result {
                tracing::error!("Activation of {} failed: {}", id, e);
                self.roll_back(&started);
                return Err(e);
            }

            started.push(id);
        }

        tracing::info!(
            "Activated {} modules in {:?}",
            started.len(),
            started_at.elapsed()
        );

        #[cfg(feature = "metrics-prometheus")]
        self.with_metrics(|m| {
            m.observe_activation(started_at.elapsed());
            m.set_active(self.registry.len());
        });

        Ok(started)
    }

    /// Replace an active module with a new instance.
    ///
    /// The active module must be runtime swappable, and the active set with
    /// the replacement descriptor in its place must validate. The old
    /// instance is stopped, unloaded and destroyed before the new one is
    /// created, loaded and started. Returns the new generation.
    ///
    /// If the new instance fails to come up, the id stays inactive and the
    /// error is returned. Modules depending on it keep running without their
    /// dependency; an error event names them, and later activations fail
    /// validation until the id is active again or they are deactivated.
    pub fn hot_swap(&self, unit: ModuleUnit) -> Result<u32> {
        let _operation = self.operation.lock();
        let id = unit.id().to_string();

        let current = self
            .registry
            .descriptor(&id)
            .ok_or_else(|| Error::module_not_found(&id))?;

        if !self.manager.can_hot_swap(&current) {
            return Err(Error::NotHotSwappable(id));
        }

        let replacement: Vec<ModuleDescriptor> = self
            .registry
            .descriptors()
            .into_iter()
            .map(|d| {
                if d.id == id {
                    unit.descriptor().clone()
                } else {
                    d
                }
            })
            .collect();

        let validation = self.manager.validate(&replacement);
        if !validation.ok {
            tracing::warn!(
                "Rejected replacement for {}: {}",
                id,
                validation.errors.join("; ")
            );
            #[cfg(feature = "metrics-prometheus")]
            self.with_metrics(|m| m.record_validation_failure());
            return validation.into_result().map(|_| 0);
        }

        // Refuse an incompatible unit while the old instance still runs.
        self.loader.check_abi(&unit)?;

        let (position, old) = self.registry.remove(&id)?;
        let generation = old.instance.generation() + 1;

        if let Err(e) = self.tear_down(old) {
            tracing::warn!("Old instance of {} did not shut down cleanly: {}", id, e);
        }

        let swapped = self
            .bring_up(unit, generation)
            .and_then(|active| self.install(self.registry.insert_at(position, active)));

        if let Err(e) = swapped {
            let orphaned = self.registry.dependents_of(&id);
            if !orphaned.is_empty() {
                let message = format!(
                    "hot swap failed; dependents left without it: {}",
                    orphaned.join(", ")
                );
                tracing::error!("Module {}: {}", id, message);
                self.hooks.read().emit_error(&id, &message);
            }
            #[cfg(feature = "metrics-prometheus")]
            self.with_metrics(|m| m.set_active(self.registry.len()));
            return Err(e);
        }

        self.hooks.read().emit_hot_swapped(&id, generation);
        #[cfg(feature = "metrics-prometheus")]
        self.with_metrics(|m| m.record_hot_swap());

        tracing::info!("Hot swapped {} (generation {})", id, generation);
        Ok(generation)
    }

    /// Stop, unload and destroy one active module.
    ///
    /// Refused while another active module depends on it.
    pub fn deactivate(&self, id: &str) -> Result<()> {
        let _operation = self.operation.lock();

        if !self.registry.contains(id) {
            return Err(Error::module_not_found(id));
        }

        let dependents = self.registry.dependents_of(id);
        if !dependents.is_empty() {
            return Err(Error::DependentsActive {
                module: id.to_string(),
                dependents,
            });
        }

        let (_, active) = self.registry.remove(id)?;
        let result = self.tear_down(active);

        #[cfg(feature = "metrics-prometheus")]
        self.with_metrics(|m| m.set_active(self.registry.len()));

        result
    }

    /// Enable or disable an active module.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.registry.set_enabled(id, enabled)?;
        tracing::debug!("Module {} enabled: {}", id, enabled);
        Ok(())
    }

    /// Check if a module is active.
    pub fn is_active(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    /// Get an active module's lifecycle state.
    pub fn state(&self, id: &str) -> Option<LifecycleState> {
        self.registry.state(id)
    }

    /// Records of active modules in activation order.
    pub fn records(&self) -> Vec<ModuleRecord> {
        self.registry.records()
    }

    /// Get an active module's record.
    pub fn record(&self, id: &str) -> Option<ModuleRecord> {
        self.registry.record(id)
    }

    /// Get the number of active modules.
    pub fn module_count(&self) -> usize {
        self.registry.len()
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Tear down every active module in reverse activation order.
    pub fn shutdown(&self) {
        let _operation = self.operation.lock();
        let ids = self.registry.ids();
        if ids.is_empty() {
            return;
        }

        tracing::info!("Shutting down {} modules", ids.len());

        for id in ids.iter().rev() {
            if let Ok((_, active)) = self.registry.remove(id) {
                if let Err(e) = self.tear_down(active) {
                    tracing::warn!("Module {} did not shut down cleanly: {}", id, e);
                }
            }
        }

        #[cfg(feature = "metrics-prometheus")]
        self.with_metrics(|m| m.set_active(0));
    }

    fn bring_up(&self, unit: ModuleUnit, generation: u32) -> Result<ActiveModule> {
        let mut instance = self.loader.instantiate(&unit, generation)?;
        let id = unit.id().to_string();

        self.hooks.read().emit_created(&id);
        #[cfg(feature = "metrics-prometheus")]
        self.with_metrics(|m| m.record_created());

        let result = instance
            .load()
            .map(|()| self.hooks.read().emit_transition(&id, LifecycleTransition::Load))
            .and_then(|()| instance.start());

        if let Err(e) = result {
            self.report_failure(&id, &e);
            instance.destroy();
            self.report_destroyed(&id);
            return Err(e);
        }

        self.hooks
            .read()
            .emit_transition(&id, LifecycleTransition::Start);

        Ok(ActiveModule::new(instance, unit))
    }

    /// Runs the remaining lifecycle steps and always destroys the instance.
    /// Returns the first callback failure.
    fn tear_down(&self, active: ActiveModule) -> Result<()> {
        let ActiveModule { mut instance, .. } = active;
        let id = instance.module_id().to_string();
        let mut first_error = None;

        if instance.state() == LifecycleState::Started {
            match instance.stop() {
                Ok(()) => self.hooks.read().emit_transition(&id, LifecycleTransition::Stop),
                Err(e) => {
                    self.report_failure(&id, &e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if instance.state() == LifecycleState::Stopped {
            match instance.unload() {
                Ok(()) => self
                    .hooks
                    .read()
                    .emit_transition(&id, LifecycleTransition::Unload),
                Err(e) => {
                    self.report_failure(&id, &e);
                    first_error.get_or_insert(e);
                }
            }
        }

        instance.destroy();
        self.report_destroyed(&id);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Finish a registry insert; a refused module is shut down, not dropped.
    fn install(&self, inserted: std::result::Result<(), Rejected>) -> Result<()> {
        inserted.map_err(|Rejected { error, module }| {
            tracing::warn!(
                "Registry refused {}: {}",
                module.descriptor().id,
                error
            );
            if let Err(e) = self.tear_down(*module) {
                tracing::warn!("Refused module did not shut down cleanly: {}", e);
            }
            error
        })
    }

    fn roll_back(&self, started: &[String]) {
        for id in started.iter().rev() {
            tracing::warn!("Rolling back {}", id);
            if let Ok((_, active)) = self.registry.remove(id) {
                if let Err(e) = self.tear_down(active) {
                    tracing::warn!("Rollback of {} did not shut down cleanly: {}", id, e);
                }
            }
        }
    }

    fn report_failure(&self, id: &str, error: &Error) {
        tracing::error!("Module {}: {}", id, error);
        self.hooks.read().emit_error(id, &error.to_string());
        #[cfg(feature = "metrics-prometheus")]
        self.with_metrics(|m| m.record_lifecycle_error());
    }

    fn report_destroyed(&self, id: &str) {
        self.hooks.read().emit_destroyed(id);
        #[cfg(feature = "metrics-prometheus")]
        self.with_metrics(|m| m.record_destroyed());
    }

    #[cfg(feature = "metrics-prometheus")]
    fn with_metrics(&self, f: impl FnOnce(&ModuleMetrics)) {
        if let Some(ref metrics) = self.metrics {
            f(metrics);
        }
    }
}

impl Default for ModuleHost {
    fn default() -> Self {
        Self::default_config()
    }
}

impl std::fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHost")
            .field("config", &self.config)
            .field("module_count", &self.registry.len())
            .finish()
    }
}

impl Drop for ModuleHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
