//! Core value types for the cluster routing layer.
//!
//! This crate provides the fundamental abstractions shared by the tending
//! engine and its callers:
//! - Hosts and node capability flags
//! - Keys, digests and partitions
//! - The copy-on-write partition ownership map
//! - Versioned cells for lock-free snapshot reads
//! - Replica selection policies and the shared error type

pub mod error;
pub mod host;
pub mod key;
pub mod node;
pub mod partition;
pub mod partition_map;
pub mod partitioner;
pub mod replica;
pub mod versioned;

pub use error::{Error, Result};
pub use host::{Host, DEFAULT_PORT};
pub use key::{Key, UserKey};
pub use node::NodeFeatures;
pub use partition::{partition_id, Digest, Partition, DIGEST_SIZE, PARTITIONS};
pub use partition_map::PartitionMap;
pub use partitioner::Partitioner;
pub use replica::ReplicaPolicy;
pub use versioned::VersionedCell;
