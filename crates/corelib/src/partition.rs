//! Partitions: the unit of ownership within a namespace.

use std::fmt;

/// Number of partitions per namespace. Must stay a power of two.
pub const PARTITIONS: usize = 4096;

/// Size of a record key digest in bytes.
pub const DIGEST_SIZE: usize = 20;

/// A record key digest.
pub type Digest = [u8; DIGEST_SIZE];

const _: () = assert!(PARTITIONS.is_power_of_two());

/// Computes the partition id of a digest: the first four bytes read
/// little-endian, masked to the partition count.
#[inline]
pub fn partition_id(digest: &Digest) -> usize {
    let low = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (low as usize) & (PARTITIONS - 1)
}

/// One partition of one namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    pub namespace: String,
    pub partition_id: usize,
}

impl Partition {
    /// Creates a partition. `partition_id` must be below `PARTITIONS`.
    pub fn new(namespace: impl Into<String>, partition_id: usize) -> Self {
        debug_assert!(partition_id < PARTITIONS);
        Self {
            namespace: namespace.into(),
            partition_id,
        }
    }

    /// Creates the partition a digest falls into.
    pub fn from_digest(namespace: impl Into<String>, digest: &Digest) -> Self {
        Self::new(namespace, partition_id(digest))
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.partition_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_id_uses_low_bytes() {
        let mut digest = [0u8; DIGEST_SIZE];
        digest[0] = 0x01;
        digest[1] = 0x02;
        assert_eq!(partition_id(&digest), 0x0201);

        // bits above the mask are dropped
        digest[1] = 0xF2;
        digest[3] = 0xFF;
        assert_eq!(partition_id(&digest), 0x0201);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut a = [7u8; DIGEST_SIZE];
        let b = a;
        a[19] = 0;
        assert_eq!(partition_id(&a), partition_id(&b));
    }
}
