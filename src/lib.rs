//! # module-host-runtime
//!
//! Host runtime for engine modules: descriptor validation, dependency-ordered
//! startup, ABI version gating and hot swap of runtime-swappable modules.
//!
//! This crate provides:
//! - **Descriptors** - Declare a module's id, API requirement, dependencies,
//!   conflicts and swap policy, in code or in TOML/JSON manifests
//! - **Validation** - Check a batch for duplicates, incompatible API versions,
//!   missing dependencies, present conflicts and cycles, collecting every error
//! - **Scheduling** - Compute startup and shutdown orders from dependencies
//! - **ABI Contract** - `create_module` / `destroy_module` /
//!   `query_module_api_version` entry points with the version checked before
//!   any instance is created
//! - **Lifecycle Management** - Drive instances through load, start, stop and
//!   unload, and destroy them exactly once
//! - **Hot Swap** - Replace swappable modules while the host runs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use module_host_runtime::{DescriptorBuilder, ModuleHost, ModuleUnit, MODULE_API_VERSION};
//!
//! #[derive(Default)]
//! struct Mesh;
//! impl module_host_runtime::Module for Mesh {}
//!
//! let host = ModuleHost::default_config();
//! let mesh = ModuleUnit::new(
//!     DescriptorBuilder::new("engine.render.mesh", MODULE_API_VERSION).build()?,
//!     module_host_runtime::module_entry_points!(Mesh),
//! );
//!
//! let started = host.activate(vec![mesh])?;
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): Descriptor manifests in TOML or JSON
//! - `dynamic`: Load module units from shared libraries
//! - `watch`: Filesystem watching for module libraries and manifests
//! - `metrics-prometheus`: Prometheus metrics integration

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod abi;
mod descriptor;
mod error;
mod instance;
mod lifecycle;
mod loader;
mod manager;
mod registry;
mod runtime;
mod schedule;
mod validation;
mod version;

#[cfg(feature = "watch")]
mod watcher;

#[cfg(feature = "metrics-prometheus")]
mod metrics;

pub use abi::{ModuleEntryPoints, OwnedModule, MODULE_API_VERSION};
pub use descriptor::{DescriptorBuilder, ModuleDescriptor, ModuleManifest, SwapPolicy};
pub use error::{Error, Result};
pub use instance::{InstanceInfo, ModuleInstance};
pub use lifecycle::{LifecycleEvent, LifecycleHooks, LifecycleState, LifecycleTransition, Module};
pub use loader::{LoaderConfig, ModuleLoader, ModuleUnit, UnitOrigin};
pub use manager::ModuleManager;
pub use registry::{
    ActiveModule, ModuleRecord, ModuleRegistry, RegistryConfig, RegistryStats, Rejected,
};
pub use runtime::{HostConfig, ModuleHost};
pub use schedule::{shutdown_order, startup_order};
pub use validation::{ValidationIssue, ValidationResult};
pub use version::Version;

#[cfg(feature = "watch")]
pub use watcher::{ModuleWatcher, WatchConfig, WatchEvent, WatchTarget};

#[cfg(feature = "metrics-prometheus")]
pub use metrics::{MetricsConfig, ModuleMetrics};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
