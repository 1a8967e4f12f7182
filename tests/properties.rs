use module_host_runtime::{
    shutdown_order, startup_order, DescriptorBuilder, ModuleDescriptor, ModuleManager, SwapPolicy,
    Version,
};
use proptest::prelude::*;

const API: Version = Version::new(1, 0, 0);

fn name(index: usize) -> String {
    format!("module.{}", index)
}

/// Node `to` depends on node `from` for every edge with `from < to`.
fn batch(node_count: usize, edges: &[(usize, usize)], rotation: usize) -> Vec<ModuleDescriptor> {
    let mut descriptors: Vec<ModuleDescriptor> = (0..node_count)
        .map(|i| {
            let deps = edges
                .iter()
                .filter(|(from, to)| *to == i && from < to)
                .map(|(from, _)| name(*from));
            DescriptorBuilder::new(name(i), API)
                .dependencies(deps)
                .build_unchecked()
        })
        .collect();

    descriptors.rotate_left(rotation % node_count);
    descriptors
}

proptest! {
    #[test]
    fn prop_acyclic_batches_validate_and_order(
        node_count in 1..16usize,
        edges in proptest::collection::vec((0..16usize, 0..16usize), 0..40),
        rotation in 0..16usize,
    ) {
        let edges: Vec<_> = edges
            .into_iter()
            .filter(|(from, to)| *from < node_count && *to < node_count)
            .collect();
        let descriptors = batch(node_count, &edges, rotation);
        let manager = ModuleManager::new(API);

        let result = manager.validate(&descriptors);
        prop_assert!(result.ok, "{:?}", result.errors);

        let order = startup_order(&descriptors);
        prop_assert_eq!(order.len(), node_count);

        let position = |i: usize| order.iter().position(|x| *x == name(i)).unwrap();
        for (from, to) in &edges {
            if from < to {
                prop_assert!(position(*from) < position(*to));
            }
        }

        let mut reversed = shutdown_order(&descriptors);
        reversed.reverse();
        prop_assert_eq!(reversed, order);

        // Validation is a pure function of its input.
        prop_assert_eq!(manager.validate(&descriptors), result);
    }

    #[test]
    fn prop_cyclic_batches_fail(
        node_count in 1..12usize,
        extra in proptest::collection::vec((0..12usize, 0..12usize), 0..20),
        rotation in 0..12usize,
    ) {
        // A chain where each node depends on the previous one...
        let mut edges: Vec<(usize, usize)> = (1..node_count).map(|i| (i - 1, i)).collect();
        edges.extend(
            extra
                .into_iter()
                .filter(|(from, to)| *from < node_count && *to < node_count),
        );
        let mut descriptors = batch(node_count, &edges, rotation);

        // ...closed by the first node depending on the last.
        let last = name(node_count - 1);
        if let Some(first) = descriptors.iter_mut().find(|d| d.id == name(0)) {
            first.dependencies.push(last);
        }

        let manager = ModuleManager::new(API);
        let result = manager.validate(&descriptors);
        prop_assert!(!result.ok);
        prop_assert!(result.has_cycle());
        prop_assert_eq!(
            result.errors.iter().filter(|e| e.contains("cycle")).count(),
            1
        );
        prop_assert!(startup_order(&descriptors).len() < node_count);
    }

    #[test]
    fn prop_hot_swap_gate_reads_policy_only(
        swappable in any::<bool>(),
        major in 0..4u16,
        minor in 0..4u16,
        deps in proptest::collection::vec("[a-z]{1,6}", 0..4),
        conflicts in proptest::collection::vec("[a-z]{1,6}", 0..4),
    ) {
        let policy = if swappable {
            SwapPolicy::RuntimeSwappable
        } else {
            SwapPolicy::RestartRequired
        };

        let descriptor = DescriptorBuilder::new("m", Version::new(major, minor, 0))
            .swap_policy(policy)
            .dependencies(deps)
            .conflicts(conflicts)
            .build_unchecked();

        prop_assert_eq!(ModuleManager::default().can_hot_swap(&descriptor), swappable);
    }

    #[test]
    fn prop_compatibility_rule(
        a in (0..3u16, 0..5u16, 0..5u16),
        b in (0..3u16, 0..5u16, 0..5u16),
    ) {
        let left = Version::new(a.0, a.1, a.2);
        let right = Version::new(b.0, b.1, b.2);

        prop_assert_eq!(
            left.is_compatible_with(&right),
            left.major == right.major && left.minor >= right.minor
        );
        if left.major == right.major && left.minor != right.minor {
            prop_assert_ne!(
                left.is_compatible_with(&right),
                right.is_compatible_with(&left)
            );
        }
    }
}
