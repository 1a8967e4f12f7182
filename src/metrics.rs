//! Prometheus metrics for the module host.

use std::time::Duration;

use prometheus::{Counter, Histogram, HistogramOpts, IntGauge, Registry};

use crate::error::{Error, Result};

/// Configuration for module metrics collection.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Prefix for every metric name.
    pub prefix: String,
    /// Histogram buckets for activation time, in seconds.
    pub activation_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: "module_host".to_string(),
            activation_buckets: vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the metric prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the activation histogram buckets.
    pub fn with_activation_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.activation_buckets = buckets;
        self
    }
}

/// Module host metrics collector.
pub struct ModuleMetrics {
    config: MetricsConfig,
    registry: Registry,
    created: Counter,
    destroyed: Counter,
    hot_swaps: Counter,
    validation_failures: Counter,
    lifecycle_errors: Counter,
    active: IntGauge,
    activation_duration: Histogram,
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Metrics(e.to_string())
}

impl ModuleMetrics {
    /// Create a collector and register its metrics in a fresh registry.
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let registry = Registry::new();
        let prefix = &config.prefix;

        let created = Counter::new(
            format!("{}_modules_created_total", prefix),
            "Module instances created through the ABI",
        )
        .map_err(metrics_error)?;

        let destroyed = Counter::new(
            format!("{}_modules_destroyed_total", prefix),
            "Module instances released through the ABI",
        )
        .map_err(metrics_error)?;

        let hot_swaps = Counter::new(
            format!("{}_hot_swaps_total", prefix),
            "Completed hot swaps",
        )
        .map_err(metrics_error)?;

        let validation_failures = Counter::new(
            format!("{}_validation_failures_total", prefix),
            "Descriptor batches rejected by validation",
        )
        .map_err(metrics_error)?;

        let lifecycle_errors = Counter::new(
            format!("{}_lifecycle_errors_total", prefix),
            "Lifecycle callbacks that reported failure",
        )
        .map_err(metrics_error)?;

        let active = IntGauge::new(format!("{}_active_modules", prefix), "Active modules")
            .map_err(metrics_error)?;

        let activation_duration = Histogram::with_opts(
            HistogramOpts::new(
                format!("{}_activation_duration_seconds", prefix),
                "Time to validate, create and start a batch",
            )
            .buckets(config.activation_buckets.clone()),
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(created.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(destroyed.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(hot_swaps.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(validation_failures.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(lifecycle_errors.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(active.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(activation_duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            config,
            registry,
            created,
            destroyed,
            hot_swaps,
            validation_failures,
            lifecycle_errors,
            active,
            activation_duration,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Get the Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record an instance creation.
    pub fn record_created(&self) {
        self.created.inc();
    }

    /// Record an instance destruction.
    pub fn record_destroyed(&self) {
        self.destroyed.inc();
    }

    /// Record a completed hot swap.
    pub fn record_hot_swap(&self) {
        self.hot_swaps.inc();
    }

    /// Record a rejected batch.
    pub fn record_validation_failure(&self) {
        self.validation_failures.inc();
    }

    /// Record a failed lifecycle callback.
    pub fn record_lifecycle_error(&self) {
        self.lifecycle_errors.inc();
    }

    /// Set the number of active modules.
    pub fn set_active(&self, count: usize) {
        self.active.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Record how long an activation took.
    pub fn observe_activation(&self, duration: Duration) {
        self.activation_duration.observe(duration.as_secs_f64());
    }

    /// Total instances created.
    pub fn created_total(&self) -> u64 {
        self.created.get() as u64
    }

    /// Total instances destroyed.
    pub fn destroyed_total(&self) -> u64 {
        self.destroyed.get() as u64
    }

    /// Total hot swaps.
    pub fn hot_swaps_total(&self) -> u64 {
        self.hot_swaps.get() as u64
    }

    /// Total rejected batches.
    pub fn validation_failures_total(&self) -> u64 {
        self.validation_failures.get() as u64
    }

    /// Total failed lifecycle callbacks.
    pub fn lifecycle_errors_total(&self) -> u64 {
        self.lifecycle_errors.get() as u64
    }

    /// Current number of active modules.
    pub fn active(&self) -> i64 {
        self.active.get()
    }
}

impl std::fmt::Debug for ModuleMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleMetrics")
            .field("config", &self.config)
            .field("created", &self.created_total())
            .field("destroyed", &self.destroyed_total())
            .field("hot_swaps", &self.hot_swaps_total())
            .field("active", &self.active())
            .finish()
    }
}
