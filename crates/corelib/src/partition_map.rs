//! Partition ownership map.
//!
//! `namespace → [replica index][partition id] → owner`. Replica index 0 is
//! the master; higher indexes are proles. Every replica row of a namespace is
//! exactly `PARTITIONS` slots long, and an empty slot means the owner is not
//! known yet rather than "no owner".
//!
//! The map is generic over the owner type so routing code can store
//! `Arc<Node>` handles without this crate knowing what a node is. Owners are
//! compared by pointer identity, never by value.
//!
//! Once published a map is never mutated: writers `clone`, `merge` the
//! updates they collected, and publish the result as a new version.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::partition::{Partition, PARTITIONS};

type ReplicaRows<N> = Vec<Vec<Option<Arc<N>>>>;

/// Maps every partition replica of every namespace to its owner.
pub struct PartitionMap<N> {
    namespaces: HashMap<String, ReplicaRows<N>>,
}

impl<N> PartitionMap<N> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            namespaces: HashMap::new(),
        }
    }

    /// Returns true if no namespace has been recorded.
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Names of the namespaces present.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// Number of replica rows recorded for a namespace.
    pub fn replica_count(&self, namespace: &str) -> usize {
        self.namespaces.get(namespace).map_or(0, Vec::len)
    }

    /// All replica rows of a namespace.
    pub fn replicas(&self, namespace: &str) -> Option<&[Vec<Option<Arc<N>>>]> {
        self.namespaces.get(namespace).map(Vec::as_slice)
    }

    /// Owner of one partition replica, if known.
    pub fn get(&self, namespace: &str, replica: usize, partition_id: usize) -> Option<&Arc<N>> {
        self.namespaces
            .get(namespace)?
            .get(replica)?
            .get(partition_id)?
            .as_ref()
    }

    /// Owner of the master replica of a partition, if known.
    pub fn master(&self, partition: &Partition) -> Option<&Arc<N>> {
        self.get(&partition.namespace, 0, partition.partition_id)
    }

    /// Records `owner` for one partition replica, growing the replica
    /// dimension as needed. Ids outside the partition range are ignored.
    pub fn set(&mut self, namespace: &str, replica: usize, partition_id: usize, owner: Arc<N>) {
        if partition_id >= PARTITIONS {
            debug_assert!(false, "partition id {partition_id} out of range");
            return;
        }
        let rows = self.rows_mut(namespace, replica + 1);
        rows[replica][partition_id] = Some(owner);
    }

    /// Makes sure a namespace has at least `replica_count` rows.
    pub fn ensure_replicas(&mut self, namespace: &str, replica_count: usize) {
        self.rows_mut(namespace, replica_count);
    }

    fn rows_mut(&mut self, namespace: &str, replica_count: usize) -> &mut ReplicaRows<N> {
        let rows = self.namespaces.entry(namespace.to_string()).or_default();
        while rows.len() < replica_count {
            rows.push(empty_row());
        }
        rows
    }

    /// Overlays every known owner of `other` onto `self`. Unknown slots in
    /// `other` never erase what `self` already knows.
    pub fn merge(&mut self, other: &PartitionMap<N>) {
        for (namespace, rows) in &other.namespaces {
            let target = self.rows_mut(namespace, rows.len());
            for (replica, row) in rows.iter().enumerate() {
                for (partition_id, owner) in row.iter().enumerate() {
                    if let Some(owner) = owner {
                        target[replica][partition_id] = Some(Arc::clone(owner));
                    }
                }
            }
        }
    }

    /// Returns true if `owner` holds any partition replica.
    pub fn contains(&self, owner: &Arc<N>) -> bool {
        self.slots().any(|slot| Arc::ptr_eq(slot, owner))
    }

    /// Number of partition replicas held by `owner`.
    pub fn owned_count(&self, owner: &Arc<N>) -> usize {
        self.slots().filter(|slot| Arc::ptr_eq(slot, owner)).count()
    }

    fn slots(&self) -> impl Iterator<Item = &Arc<N>> {
        self.namespaces
            .values()
            .flat_map(|rows| rows.iter())
            .flat_map(|row| row.iter())
            .filter_map(Option::as_ref)
    }
}

fn empty_row<N>() -> Vec<Option<Arc<N>>> {
    let mut row = Vec::with_capacity(PARTITIONS);
    row.resize_with(PARTITIONS, || None);
    row
}

impl<N> Default for PartitionMap<N> {
    fn default() -> Self {
        Self::new()
    }
}

// Cloning copies the slot vectors and bumps the owners' reference counts;
// owners themselves are shared.
impl<N> Clone for PartitionMap<N> {
    fn clone(&self) -> Self {
        Self {
            namespaces: self.namespaces.clone(),
        }
    }
}

impl<N: fmt::Display> fmt::Display for PartitionMap<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut namespaces: Vec<_> = self.namespaces.iter().collect();
        namespaces.sort_by(|a, b| a.0.cmp(b.0));
        for (namespace, rows) in namespaces {
            for (replica, row) in rows.iter().enumerate() {
                for (partition_id, owner) in row.iter().enumerate() {
                    match owner {
                        Some(owner) => writeln!(f, "{namespace},{replica},{partition_id},{owner}")?,
                        None => writeln!(f, "{namespace},{replica},{partition_id},NIL")?,
                    }
                }
            }
        }
        Ok(())
    }
}

impl<N> fmt::Debug for PartitionMap<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        for (namespace, rows) in &self.namespaces {
            m.entry(namespace, &rows.len());
        }
        m.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_rectangular() {
        let mut map: PartitionMap<&str> = PartitionMap::new();
        map.set("test", 2, 10, Arc::new("a"));

        let rows = map.replicas("test").unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.len() == PARTITIONS));
        assert!(map.get("test", 0, 10).is_none());
        assert_eq!(**map.get("test", 2, 10).unwrap(), "a");
    }

    #[test]
    fn test_merge_keeps_known_owners() {
        let a = Arc::new("a");
        let b = Arc::new("b");

        let mut published: PartitionMap<&str> = PartitionMap::new();
        published.set("test", 0, 1, Arc::clone(&a));
        published.set("test", 0, 2, Arc::clone(&a));

        let mut update: PartitionMap<&str> = PartitionMap::new();
        update.set("test", 0, 2, Arc::clone(&b));
        update.set("other", 1, 5, Arc::clone(&b));

        published.merge(&update);
        assert!(Arc::ptr_eq(published.get("test", 0, 1).unwrap(), &a));
        assert!(Arc::ptr_eq(published.get("test", 0, 2).unwrap(), &b));
        assert!(Arc::ptr_eq(published.get("other", 1, 5).unwrap(), &b));
        assert_eq!(published.replica_count("other"), 2);
    }

    #[test]
    fn test_clone_is_independent() {
        let a = Arc::new("a");
        let mut original: PartitionMap<&str> = PartitionMap::new();
        original.set("test", 0, 0, Arc::clone(&a));

        let mut copy = original.clone();
        copy.set("test", 0, 1, Arc::clone(&a));

        assert!(original.get("test", 0, 1).is_none());
        assert!(copy.get("test", 0, 1).is_some());
    }

    #[test]
    fn test_contains_uses_identity() {
        let a = Arc::new("same");
        let lookalike = Arc::new("same");
        let mut map: PartitionMap<&str> = PartitionMap::new();
        map.set("test", 0, 0, Arc::clone(&a));
        map.set("test", 1, 7, Arc::clone(&a));

        assert!(map.contains(&a));
        assert!(!map.contains(&lookalike));
        assert_eq!(map.owned_count(&a), 2);
    }

    #[test]
    fn test_display_lists_nil_slots() {
        let mut map: PartitionMap<&str> = PartitionMap::new();
        map.set("ns", 0, 0, Arc::new("n1"));
        let out = map.to_string();
        assert!(out.starts_with("ns,0,0,n1\nns,0,1,NIL\n"));
        assert_eq!(out.lines().count(), PARTITIONS);
    }
}
