//! Record keys and their digests.

use std::fmt;

use crate::partition::{Digest, Partition};
use crate::partitioner::{Blake3Partitioner, Partitioner};

/// The user-supplied part of a record key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UserKey {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl UserKey {
    /// Particle type tag mixed into the digest so equal bytes of different
    /// types never collide.
    pub fn particle_type(&self) -> u8 {
        match self {
            UserKey::Int(_) => 1,
            UserKey::Str(_) => 3,
            UserKey::Bytes(_) => 4,
        }
    }

    /// Canonical byte form used for digesting.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UserKey::Int(v) => v.to_be_bytes().to_vec(),
            UserKey::Str(s) => s.as_bytes().to_vec(),
            UserKey::Bytes(b) => b.clone(),
        }
    }
}

impl From<i64> for UserKey {
    fn from(v: i64) -> Self {
        UserKey::Int(v)
    }
}

impl From<&str> for UserKey {
    fn from(v: &str) -> Self {
        UserKey::Str(v.to_string())
    }
}

impl From<String> for UserKey {
    fn from(v: String) -> Self {
        UserKey::Str(v)
    }
}

impl From<Vec<u8>> for UserKey {
    fn from(v: Vec<u8>) -> Self {
        UserKey::Bytes(v)
    }
}

impl From<&[u8]> for UserKey {
    fn from(v: &[u8]) -> Self {
        UserKey::Bytes(v.to_vec())
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserKey::Int(v) => write!(f, "{v}"),
            UserKey::Str(s) => write!(f, "{s}"),
            UserKey::Bytes(b) => write!(f, "{b:02x?}"),
        }
    }
}

/// Identifies a record: namespace, set, and a digest derived from the user key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    pub namespace: String,
    pub set_name: String,
    /// Kept for display; routing only ever looks at the digest.
    pub user_key: Option<UserKey>,
    pub digest: Digest,
}

impl Key {
    /// Builds a key digested with the default partitioner.
    pub fn new(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        user_key: impl Into<UserKey>,
    ) -> Self {
        Self::with_partitioner(&Blake3Partitioner, namespace, set_name, user_key)
    }

    /// Builds a key digested with the given partitioner.
    pub fn with_partitioner<P: Partitioner + ?Sized>(
        partitioner: &P,
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        user_key: impl Into<UserKey>,
    ) -> Self {
        let set_name = set_name.into();
        let user_key = user_key.into();
        let digest = partitioner.digest(&set_name, &user_key);
        Self {
            namespace: namespace.into(),
            set_name,
            user_key: Some(user_key),
            digest,
        }
    }

    /// Builds a key from a digest computed elsewhere.
    pub fn from_digest(namespace: impl Into<String>, set_name: impl Into<String>, digest: Digest) -> Self {
        Self {
            namespace: namespace.into(),
            set_name: set_name.into(),
            user_key: None,
            digest,
        }
    }

    /// The partition this key lives in.
    pub fn partition(&self) -> Partition {
        Partition::from_digest(self.namespace.clone(), &self.digest)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user_key {
            Some(k) => write!(f, "{}:{}:{}", self.namespace, self.set_name, k),
            None => write!(f, "{}:{}:<digest>", self.namespace, self.set_name),
        }
    }
}
