//! Deciding which nodes to drop after a tend cycle.
//!
//! The rules depend on cluster size because the evidence differs: a lone
//! node can only be judged by its own failures, two nodes can only vouch
//! for each other, and larger clusters can outvote a node that nobody lists.

use std::sync::Arc;

use corelib::PartitionMap;

use crate::node::Node;
use crate::policy::RemovalPolicy;

/// Returns the nodes to remove.
///
/// # Arguments
/// * `nodes` - The published node list
/// * `refresh_count` - Successful refreshes during this cycle
/// * `partitions` - The published partition map
/// * `policy` - Removal thresholds
pub fn find_nodes_to_remove(
    nodes: &[Arc<Node>],
    refresh_count: usize,
    partitions: &PartitionMap<Node>,
    policy: &RemovalPolicy,
) -> Vec<Arc<Node>> {
    let mut remove = Vec::new();

    for node in nodes {
        if !node.is_active() {
            remove.push(Arc::clone(node));
            continue;
        }

        let failures = node.failures();
        let unreferenced = node.reference_count() == 0;

        let drop_it = match nodes.len() {
            1 => failures >= policy.single_node_max_failures,
            2 => refresh_count == policy.two_node_refresh_count && unreferenced && failures > 0,
            _ => {
                let suspect = (refresh_count >= 1 && unreferenced)
                    || (refresh_count == 0 && failures > policy.multi_node_max_failures);
                // a healthy node nobody lists is kept while it still owns data
                suspect && (failures > 0 || !partitions.contains(node))
            }
        };

        if drop_it {
            remove.push(Arc::clone(node));
        }
    }

    remove
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Connector;
    use crate::policy::ClientPolicy;

    fn nodes(names: &[&str]) -> Vec<Arc<Node>> {
        let connector = Arc::new(Connector::new(Arc::new(ClientPolicy::default())).unwrap());
        names
            .iter()
            .map(|n| Node::detached(n, Arc::clone(&connector)))
            .collect()
    }

    fn names(list: &[Arc<Node>]) -> Vec<&str> {
        list.iter().map(|n| n.name()).collect()
    }

    #[test]
    fn test_inactive_always_removed() {
        let list = nodes(&["A", "B", "C"]);
        for n in &list {
            n.increment_reference();
        }
        list[1].close();
        let remove = find_nodes_to_remove(&list, 3, &PartitionMap::new(), &RemovalPolicy::default());
        assert_eq!(names(&remove), ["B"]);
    }

    #[test]
    fn test_single_node_threshold() {
        let list = nodes(&["A"]);
        let policy = RemovalPolicy::default();

        list[0].set_failures(4);
        assert!(find_nodes_to_remove(&list, 0, &PartitionMap::new(), &policy).is_empty());

        list[0].set_failures(5);
        assert_eq!(find_nodes_to_remove(&list, 0, &PartitionMap::new(), &policy).len(), 1);
    }

    #[test]
    fn test_two_nodes_need_one_refresh() {
        let list = nodes(&["A", "B"]);
        let policy = RemovalPolicy::default();
        list[0].increment_reference();
        list[1].set_failures(1);

        assert_eq!(
            names(&find_nodes_to_remove(&list, 1, &PartitionMap::new(), &policy)),
            ["B"]
        );
        // no successful refresh: nothing to compare against
        assert!(find_nodes_to_remove(&list, 0, &PartitionMap::new(), &policy).is_empty());
    }

    #[test]
    fn test_multi_node_unreferenced_without_partitions() {
        let list = nodes(&["A", "B", "C"]);
        list[0].increment_reference();
        list[1].increment_reference();

        let remove = find_nodes_to_remove(&list, 3, &PartitionMap::new(), &RemovalPolicy::default());
        assert_eq!(names(&remove), ["C"]);
    }

    #[test]
    fn test_multi_node_unreferenced_owner_kept() {
        let list = nodes(&["A", "B", "C"]);
        list[0].increment_reference();
        list[1].increment_reference();

        let mut partitions = PartitionMap::new();
        partitions.set("test", 0, 7, Arc::clone(&list[2]));

        let remove = find_nodes_to_remove(&list, 3, &partitions, &RemovalPolicy::default());
        assert!(remove.is_empty());
    }

    #[test]
    fn test_multi_node_cut_off() {
        let list = nodes(&["A", "B", "C"]);
        for n in &list {
            n.set_failures(6);
        }
        let remove = find_nodes_to_remove(&list, 0, &PartitionMap::new(), &RemovalPolicy::default());
        assert_eq!(remove.len(), 3);

        for n in &list {
            n.set_failures(5);
        }
        assert!(find_nodes_to_remove(&list, 0, &PartitionMap::new(), &RemovalPolicy::default()).is_empty());
    }
}
