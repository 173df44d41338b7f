//! Partitioner abstraction.
//!
//! Partitioners are responsible for converting record keys into digests,
//! and digests into one of the `PARTITIONS` partition ids.

pub mod blake3;
pub mod traits;

pub use self::blake3::Blake3Partitioner;
pub use traits::Partitioner;
