//! Error types for module host operations.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, sequencing or swapping modules.
///
/// Descriptor validation problems are not reported through this type one by
/// one; they are collected into a [`ValidationResult`](crate::ValidationResult)
/// and only surface here as [`Error::ValidationFailed`] when a host operation
/// refuses to continue.
#[derive(Error, Debug)]
pub enum Error {
    /// Module not active in the host.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// Invalid descriptor or version string.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Module already active in the host.
    #[error("module already active: {0}")]
    ModuleAlreadyActive(String),

    /// The unit was built against an incompatible module ABI.
    #[error("module ABI mismatch for '{module}': built against {built}, host provides {host}")]
    AbiVersionMismatch {
        /// Module id.
        module: String,
        /// ABI version reported by the unit.
        built: String,
        /// ABI version of the host.
        host: String,
    },

    /// Descriptor batch failed validation.
    #[error("module validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    /// Lifecycle transition attempted from the wrong state.
    #[error("invalid module state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state.
        expected: String,
        /// Actual state.
        actual: String,
    },

    /// Module declares `RestartRequired` and cannot be replaced at runtime.
    #[error("module '{0}' is not runtime swappable")]
    NotHotSwappable(String),

    /// Module is still required by active dependents.
    #[error("module '{module}' is required by active modules: {}", .dependents.join(", "))]
    DependentsActive {
        /// Module id.
        module: String,
        /// Active modules depending on it.
        dependents: Vec<String>,
    },

    /// Module could not be loaded.
    #[error("module could not be loaded: {0}")]
    LoadFailed(String),

    /// Required ABI symbol missing from a module library.
    #[error("symbol '{symbol}' not found in {library}")]
    SymbolNotFound {
        /// Library path.
        library: String,
        /// Symbol name.
        symbol: String,
    },

    /// A lifecycle callback reported failure.
    #[error("module '{module}' failed during {stage}: {message}")]
    LifecycleFailed {
        /// Module id.
        module: String,
        /// Lifecycle stage.
        stage: &'static str,
        /// Failure message.
        message: String,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest parse error.
    #[cfg(feature = "serde")]
    #[error("manifest parse error: {0}")]
    ManifestParse(String),

    /// Watch error.
    #[cfg(feature = "watch")]
    #[error("watch error: {0}")]
    Watch(String),

    /// Metrics registration error.
    #[cfg(feature = "metrics-prometheus")]
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Registry error.
    #[error("registry error: {0}")]
    Registry(String),

    /// Free-form failure raised by module code.
    #[error("{0}")]
    Module(String),
}

impl Error {
    /// Create a module not found error.
    pub fn module_not_found(id: impl Into<String>) -> Self {
        Self::ModuleNotFound(id.into())
    }

    /// Create an invalid descriptor error.
    pub fn invalid_descriptor(msg: impl Into<String>) -> Self {
        Self::InvalidDescriptor(msg.into())
    }

    /// Create an ABI version mismatch error.
    pub fn abi_version_mismatch(
        module: impl Into<String>,
        built: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self::AbiVersionMismatch {
            module: module.into(),
            built: built.into(),
            host: host.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a load failed error.
    pub fn load_failed(msg: impl Into<String>) -> Self {
        Self::LoadFailed(msg.into())
    }

    /// Create a symbol not found error.
    pub fn symbol_not_found(library: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::SymbolNotFound {
            library: library.into(),
            symbol: symbol.into(),
        }
    }

    /// Create a lifecycle failure error.
    pub fn lifecycle_failed(
        module: impl Into<String>,
        stage: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::LifecycleFailed {
            module: module.into(),
            stage,
            message: message.into(),
        }
    }

    /// Create a module-raised error.
    pub fn module(msg: impl Into<String>) -> Self {
        Self::Module(msg.into())
    }

    /// Returns true if the host stays usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ModuleNotFound(_)
                | Self::ModuleAlreadyActive(_)
                | Self::ValidationFailed(_)
                | Self::InvalidState { .. }
                | Self::NotHotSwappable(_)
                | Self::DependentsActive { .. }
                | Self::AbiVersionMismatch { .. }
        )
    }

    /// Returns true if this error came from the loader boundary.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Self::LoadFailed(_) | Self::SymbolNotFound { .. } | Self::AbiVersionMismatch { .. }
        )
    }
}
