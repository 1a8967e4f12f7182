//! Descriptor validation, ordering and the hot-swap gate.

use std::collections::HashSet;

use crate::abi::MODULE_API_VERSION;
use crate::descriptor::{ModuleDescriptor, SwapPolicy};
use crate::schedule;
use crate::validation::{ValidationIssue, ValidationResult};
use crate::version::Version;

/// Validates descriptor batches against a fixed supported API version.
///
/// The manager holds no other state. It is `Send + Sync` and every method
/// is a pure function of its arguments, so one manager can serve any number
/// of validation calls from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleManager {
    supported_api_version: Version,
}

impl ModuleManager {
    /// Create a manager serving `supported_api_version`.
    pub const fn new(supported_api_version: Version) -> Self {
        Self {
            supported_api_version,
        }
    }

    /// The API version every descriptor is checked against.
    pub const fn supported_api_version(&self) -> Version {
        self.supported_api_version
    }

    /// Validate a batch of descriptors.
    ///
    /// All problems are collected; nothing short-circuits. Errors appear as:
    /// duplicate ids and API incompatibilities while walking the batch,
    /// then missing dependencies and present conflicts per descriptor,
    /// then a single cycle error if the startup order is shorter than the
    /// batch. When an id repeats, the first descriptor carrying it is the one
    /// other modules resolve against. A module listing its own id as a
    /// conflict always conflicts with itself.
    pub fn validate(&self, descriptors: &[ModuleDescriptor]) -> ValidationResult {
        let mut result = ValidationResult::new();
        let (_, index) = schedule::canonical(descriptors);

        let mut seen = HashSet::with_capacity(descriptors.len());

        for descriptor in descriptors {
            if !seen.insert(descriptor.id.as_str()) {
                result.push(ValidationIssue::DuplicateId {
                    id: descriptor.id.clone(),
                });
            }

            if !descriptor
                .required_api_version
                .is_compatible_with(&self.supported_api_version)
            {
                result.push(ValidationIssue::IncompatibleApi {
                    id: descriptor.id.clone(),
                    required: descriptor.required_api_version,
                });
            }
        }

        for descriptor in descriptors {
            for dependency in &descriptor.dependencies {
                if !index.contains_key(dependency.as_str()) {
                    result.push(ValidationIssue::MissingDependency {
                        id: descriptor.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            for conflict in &descriptor.conflicts {
                if index.contains_key(conflict.as_str()) {
                    result.push(ValidationIssue::Conflict {
                        id: descriptor.id.clone(),
                        other: conflict.clone(),
                    });
                }
            }
        }

        if schedule::leaves_out(descriptors) {
            result.push(ValidationIssue::Cycle);
        }

        if !result.ok {
            tracing::debug!(
                "Validation of {} module descriptors found {} errors",
                descriptors.len(),
                result.error_count()
            );
        }

        result
    }

    /// Compute the startup order for a batch.
    ///
    /// See [`schedule::startup_order`].
    pub fn startup_order(&self, descriptors: &[ModuleDescriptor]) -> Vec<String> {
        schedule::startup_order(descriptors)
    }

    /// Compute the shutdown order for a batch.
    pub fn shutdown_order(&self, descriptors: &[ModuleDescriptor]) -> Vec<String> {
        schedule::shutdown_order(descriptors)
    }

    /// Check whether a module may be replaced while the host runs.
    ///
    /// Depends on the swap policy alone.
    pub fn can_hot_swap(&self, descriptor: &ModuleDescriptor) -> bool {
        descriptor.swap_policy == SwapPolicy::RuntimeSwappable
    }
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new(MODULE_API_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;

    const API: Version = Version::new(1, 0, 0);

    fn module(id: &str, deps: &[&str]) -> ModuleDescriptor {
        DescriptorBuilder::new(id, API)
            .dependencies(deps.iter().copied())
            .build_unchecked()
    }

    fn manager() -> ModuleManager {
        ModuleManager::new(API)
    }

    #[test]
    fn test_empty_batch_is_valid() {
        let result = manager().validate(&[]);
        assert!(result.ok);
        assert!(result.errors.is_empty());
        assert!(manager().startup_order(&[]).is_empty());
    }

    #[test]
    fn test_chain_scenario() {
        let batch = vec![module("a", &[]), module("b", &["a"]), module("c", &["a", "b"])];

        let result = manager().validate(&batch);
        assert!(result.ok, "{:?}", result.errors);

        let order = manager().startup_order(&batch);
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn test_two_node_cycle_scenario() {
        let batch = vec![module("x", &["y"]), module("y", &["x"])];

        let result = manager().validate(&batch);
        assert!(!result.ok);
        assert_eq!(result.errors, vec!["Module dependency cycle detected"]);
        assert!(manager().startup_order(&batch).len() < 2);
    }

    #[test]
    fn test_incompatible_api_scenario() {
        let batch = vec![DescriptorBuilder::new("m", Version::new(2, 0, 0)).build_unchecked()];

        let result = manager().validate(&batch);
        assert!(!result.ok);
        assert_eq!(
            result.errors,
            vec!["Module 'm' requires incompatible API version 2.0.0"]
        );
    }

    #[test]
    fn test_required_minor_checked_against_host() {
        let host = ModuleManager::new(Version::new(1, 1, 0));

        let newer = vec![DescriptorBuilder::new("newer", Version::new(1, 2, 0)).build_unchecked()];
        assert!(host.validate(&newer).ok);

        let older = vec![DescriptorBuilder::new("older", Version::new(1, 0, 0)).build_unchecked()];
        assert!(!host.validate(&older).ok);
    }

    #[test]
    fn test_duplicate_scenario() {
        let batch = vec![
            module("dup", &[]),
            DescriptorBuilder::new("dup", API)
                .dependency("nowhere")
                .build_unchecked(),
        ];

        let result = manager().validate(&batch);
        assert!(!result.ok);

        let duplicates: Vec<_> = result
            .errors
            .iter()
            .filter(|e| e.starts_with("Duplicate module id"))
            .collect();
        assert_eq!(duplicates, vec!["Duplicate module id detected: dup"]);

        // Both descriptors still get dependency checks.
        assert!(result
            .errors
            .contains(&"Module 'dup' is missing dependency 'nowhere'".to_string()));

        // The second "dup" never gets a slot in the startup order.
        assert!(result.has_cycle());
    }

    #[test]
    fn test_duplicate_resolves_against_first() {
        let batch = vec![
            module("base", &[]),
            module("base", &["base"]),
            module("app", &["base"]),
        ];

        let result = manager().validate(&batch);
        assert_eq!(
            result.errors,
            vec![
                "Duplicate module id detected: base",
                "Module dependency cycle detected",
            ]
        );
        assert_eq!(manager().startup_order(&batch), vec!["base", "app"]);
    }

    #[test]
    fn test_missing_dependency_and_conflict() {
        let batch = vec![
            DescriptorBuilder::new("lighting.basic", API)
                .dependency("render.mesh")
                .conflict("lighting.legacy")
                .build_unchecked(),
            module("lighting.legacy", &[]),
        ];

        let result = manager().validate(&batch);
        assert_eq!(
            result.errors,
            vec![
                "Module 'lighting.basic' is missing dependency 'render.mesh'",
                "Module 'lighting.basic' conflicts with loaded module 'lighting.legacy'",
                "Module dependency cycle detected",
            ]
        );
    }

    #[test]
    fn test_missing_dependency_fails_ordering() {
        let batch = vec![module("a", &["ghost"])];

        let result = manager().validate(&batch);
        assert!(manager().startup_order(&batch).is_empty());
        assert_eq!(
            result.errors,
            vec![
                "Module 'a' is missing dependency 'ghost'",
                "Module dependency cycle detected",
            ]
        );
    }

    #[test]
    fn test_absent_conflict_is_fine() {
        let batch = vec![DescriptorBuilder::new("a", API).conflict("b").build_unchecked()];
        assert!(manager().validate(&batch).ok);
    }

    #[test]
    fn test_self_conflict_is_reported() {
        let batch = vec![DescriptorBuilder::new("a", API).conflict("a").build_unchecked()];
        let result = manager().validate(&batch);
        assert!(!result.ok);
        assert_eq!(
            result.errors,
            vec!["Module 'a' conflicts with loaded module 'a'"]
        );
    }

    #[test]
    fn test_self_dependency_reported_as_cycle_only() {
        let batch = vec![module("self", &["self"])];
        let result = manager().validate(&batch);
        assert_eq!(result.errors, vec!["Module dependency cycle detected"]);
    }

    #[test]
    fn test_error_order() {
        let batch = vec![
            DescriptorBuilder::new("a", Version::new(3, 0, 0))
                .dependency("missing")
                .build_unchecked(),
            module("a", &[]),
            module("x", &["y"]),
            module("y", &["x"]),
        ];

        let result = manager().validate(&batch);
        assert_eq!(
            result.errors,
            vec![
                "Module 'a' requires incompatible API version 3.0.0",
                "Duplicate module id detected: a",
                "Module 'a' is missing dependency 'missing'",
                "Module dependency cycle detected",
            ]
        );
    }

    #[test]
    fn test_validate_is_idempotent() {
        let batch = vec![module("x", &["y"]), module("y", &["x"]), module("z", &["q"])];
        let first = manager().validate(&batch);
        let second = manager().validate(&batch);
        assert_eq!(first, second);
    }

    #[test]
    fn test_can_hot_swap_depends_on_policy_only() {
        let swappable = DescriptorBuilder::new("m", API).swappable().build_unchecked();
        let mut changed = swappable.clone();
        changed.module_version = Version::new(9, 9, 9);
        changed.dependencies.push("other".into());

        assert!(manager().can_hot_swap(&swappable));
        assert_eq!(manager().can_hot_swap(&swappable), manager().can_hot_swap(&changed));

        let fixed = module("m", &[]);
        assert!(!manager().can_hot_swap(&fixed));
    }

    #[test]
    fn test_manager_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ModuleManager>();
        assert_eq!(ModuleManager::default().supported_api_version(), MODULE_API_VERSION);
    }
}
