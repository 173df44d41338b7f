//! Core partitioner trait definitions.

use crate::key::UserKey;
use crate::partition::{partition_id, Digest};

/// A partitioner converts a record key into a fixed-size digest, and the
/// digest into a partition id.
///
/// Partitioners are stateless and thread-safe, allowing concurrent digest
/// computation without synchronization overhead.
pub trait Partitioner: Send + Sync + 'static {
    /// Computes the digest of a user key within a set.
    ///
    /// # Arguments
    ///
    /// * `set_name` - The set the record belongs to (may be empty)
    /// * `key` - The user supplied key
    fn digest(&self, set_name: &str, key: &UserKey) -> Digest;

    /// Maps a digest onto a partition id.
    ///
    /// The default keeps the low bits of the first four digest bytes, read
    /// little-endian, which is what the servers use to place records.
    fn partition_id(&self, digest: &Digest) -> usize {
        partition_id(digest)
    }

    /// Returns the name of this partitioner.
    fn name(&self) -> &'static str;
}
