//! Startup and shutdown ordering.
//!
//! Orders are topological sorts over the dependency relation, with an edge
//! from each dependency to its dependent, computed with Kahn's algorithm. The
//! ready queue is FIFO and seeded in descriptor order, and dependents are
//! released in descriptor order, so the output is deterministic for a given
//! input. Callers should still rely only on dependency edges being respected.

use std::collections::{HashMap, VecDeque};

use crate::descriptor::ModuleDescriptor;

/// Compute the order in which modules must be created and started.
///
/// Every dependency precedes its dependents. Modules on a dependency cycle,
/// behind one, or waiting on an id absent from the batch are left out, so a
/// result shorter than the batch signals a problem. When ids repeat, the
/// first descriptor with that id is used and the id appears once.
pub fn startup_order(descriptors: &[ModuleDescriptor]) -> Vec<String> {
    let (nodes, index) = canonical(descriptors);

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (node, descriptor) in nodes.iter().enumerate() {
        in_degree[node] = descriptor.dependencies.len();
        for dependency in &descriptor.dependencies {
            if let Some(&dep) = index.get(dependency.as_str()) {
                dependents[dep].push(node);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|&n| in_degree[n] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(node) = ready.pop_front() {
        order.push(nodes[node].id.clone());

        for &dependent in &dependents[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }

    order
}

/// Compute the order in which modules must be stopped and destroyed.
///
/// The reverse of [`startup_order`].
pub fn shutdown_order(descriptors: &[ModuleDescriptor]) -> Vec<String> {
    let mut order = startup_order(descriptors);
    order.reverse();
    order
}

/// Check whether [`startup_order`] leaves any descriptor out.
///
/// Covers dependency cycles as well as modules blocked by a missing
/// dependency or shadowed by an earlier duplicate.
pub(crate) fn leaves_out(descriptors: &[ModuleDescriptor]) -> bool {
    startup_order(descriptors).len() != descriptors.len()
}

/// First-wins view of a batch: distinct descriptors in order plus an id index.
pub(crate) fn canonical(
    descriptors: &[ModuleDescriptor],
) -> (Vec<&ModuleDescriptor>, HashMap<&str, usize>) {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(descriptors.len());
    let mut nodes = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        if !index.contains_key(descriptor.id.as_str()) {
            index.insert(descriptor.id.as_str(), nodes.len());
            nodes.push(descriptor);
        }
    }

    (nodes, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;
    use crate::version::Version;

    fn module(id: &str, deps: &[&str]) -> ModuleDescriptor {
        DescriptorBuilder::new(id, Version::new(1, 0, 0))
            .dependencies(deps.iter().copied())
            .build_unchecked()
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_empty_batch() {
        assert!(startup_order(&[]).is_empty());
        assert!(!leaves_out(&[]));
    }

    #[test]
    fn test_chain_order() {
        let batch = vec![
            module("c", &["a", "b"]),
            module("b", &["a"]),
            module("a", &[]),
        ];

        let order = startup_order(&batch);
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(shutdown_order(&batch), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_independent_roots_keep_declaration_order() {
        let batch = vec![module("x", &[]), module("y", &[]), module("z", &["x"])];
        assert_eq!(startup_order(&batch), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_diamond() {
        let batch = vec![
            module("app", &["left", "right"]),
            module("left", &["base"]),
            module("right", &["base"]),
            module("base", &[]),
        ];

        let order = startup_order(&batch);
        assert_eq!(order.len(), 4);
        assert!(position(&order, "base") < position(&order, "left"));
        assert!(position(&order, "base") < position(&order, "right"));
        assert!(position(&order, "left") < position(&order, "app"));
        assert!(position(&order, "right") < position(&order, "app"));
    }

    #[test]
    fn test_cycle_is_left_out() {
        let batch = vec![module("x", &["y"]), module("y", &["x"]), module("free", &[])];
        assert_eq!(startup_order(&batch), vec!["free"]);
        assert!(leaves_out(&batch));
    }

    #[test]
    fn test_self_dependency_is_left_out() {
        let batch = vec![module("self", &["self"])];
        assert!(startup_order(&batch).is_empty());
        assert!(leaves_out(&batch));
    }

    #[test]
    fn test_missing_dependency_blocks_ordering() {
        let batch = vec![module("a", &["ghost"]), module("b", &["a"])];
        assert!(startup_order(&batch).is_empty());
        assert!(leaves_out(&batch));
    }

    #[test]
    fn test_duplicates_use_first_descriptor() {
        let batch = vec![module("dup", &[]), module("dup", &["dup"]), module("after", &["dup"])];
        assert_eq!(startup_order(&batch), vec!["dup", "after"]);
        assert!(leaves_out(&batch));
    }

    #[test]
    fn test_repeated_dependency_entry() {
        let batch = vec![module("a", &[]), module("b", &["a", "a"])];
        assert_eq!(startup_order(&batch), vec!["a", "b"]);
        assert!(!leaves_out(&batch));
    }
}
