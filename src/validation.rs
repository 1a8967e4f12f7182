//! Validation results for descriptor batches.

use crate::error::{Error, Result};
use crate::version::Version;

/// A single problem found while validating a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// Two descriptors share an id.
    DuplicateId {
        /// The repeated id.
        id: String,
    },
    /// Required API version is not served by the host.
    IncompatibleApi {
        /// Module id.
        id: String,
        /// Version the module requires.
        required: Version,
    },
    /// A declared dependency is absent from the batch.
    MissingDependency {
        /// Module id.
        id: String,
        /// Missing dependency id.
        dependency: String,
    },
    /// A declared conflict is present in the batch.
    Conflict {
        /// Module id.
        id: String,
        /// Conflicting module id.
        other: String,
    },
    /// The dependency graph is not acyclic.
    Cycle,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId { id } => write!(f, "Duplicate module id detected: {}", id),
            Self::IncompatibleApi { id, required } => write!(
                f,
                "Module '{}' requires incompatible API version {}",
                id, required
            ),
            Self::MissingDependency { id, dependency } => write!(
                f,
                "Module '{}' is missing dependency '{}'",
                id, dependency
            ),
            Self::Conflict { id, other } => write!(
                f,
                "Module '{}' conflicts with loaded module '{}'",
                id, other
            ),
            Self::Cycle => f.write_str("Module dependency cycle detected"),
        }
    }
}

/// Outcome of validating a descriptor batch.
///
/// `errors` keeps detection order: the identity/API pass first, then
/// dependency and conflict errors in descriptor order, then at most one
/// cycle error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ValidationResult {
    /// True iff no error was recorded.
    pub ok: bool,
    /// Human-readable errors in detection order.
    pub errors: Vec<String>,
}

impl ValidationResult {
    /// Create an empty, passing result.
    pub fn new() -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
        }
    }

    /// Record an issue.
    pub fn push(&mut self, issue: ValidationIssue) {
        self.ok = false;
        self.errors.push(issue.to_string());
    }

    /// Number of recorded errors.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Check if any error mentions a dependency cycle.
    pub fn has_cycle(&self) -> bool {
        let cycle = ValidationIssue::Cycle.to_string();
        self.errors.iter().any(|e| *e == cycle)
    }

    /// Convert into a `Result`, failing with [`Error::ValidationFailed`].
    pub fn into_result(self) -> Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(Error::ValidationFailed(self.errors))
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}
