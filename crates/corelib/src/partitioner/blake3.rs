//! BLAKE3 digest partitioner.

use crate::key::UserKey;
use crate::partition::{Digest, DIGEST_SIZE};
use crate::partitioner::traits::Partitioner;

/// Digests `set name || particle type || key bytes` with BLAKE3 and keeps
/// the first 20 bytes.
#[derive(Clone, Debug, Default)]
pub struct Blake3Partitioner;

impl Partitioner for Blake3Partitioner {
    fn digest(&self, set_name: &str, key: &UserKey) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(set_name.as_bytes());
        hasher.update(&[key.particle_type()]);
        hasher.update(&key.to_bytes());

        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&hasher.finalize().as_bytes()[..DIGEST_SIZE]);
        digest
    }

    fn name(&self) -> &'static str {
        "Blake3Partitioner"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_name_changes_digest() {
        let p = Blake3Partitioner;
        let key = UserKey::from("user:42");
        assert_ne!(p.digest("users", &key), p.digest("sessions", &key));
    }

    #[test]
    fn test_particle_type_changes_digest() {
        // the integer 0x31 and the string "1" share a byte but not a type
        let p = Blake3Partitioner;
        assert_ne!(
            p.digest("s", &UserKey::Bytes(vec![b'1'])),
            p.digest("s", &UserKey::from("1"))
        );
    }
}
