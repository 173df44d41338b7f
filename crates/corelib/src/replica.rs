//! Replica selection policies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Which replica of a partition a read should target.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaPolicy {
    /// The master (replica index 0), falling back to a random node.
    #[default]
    Master,
    /// Master and prole replicas in round-robin, falling back to a random node.
    MasterProles,
    /// Any active node.
    Random,
}

impl fmt::Display for ReplicaPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaPolicy::Master => write!(f, "master"),
            ReplicaPolicy::MasterProles => write!(f, "master_proles"),
            ReplicaPolicy::Random => write!(f, "random"),
        }
    }
}

impl FromStr for ReplicaPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "master" => Ok(ReplicaPolicy::Master),
            "master_proles" => Ok(ReplicaPolicy::MasterProles),
            "random" => Ok(ReplicaPolicy::Random),
            _ => Err(Error::Parse(format!(
                "unknown replica policy '{s}'. valid options: master, master_proles, random"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        assert_eq!("master".parse::<ReplicaPolicy>().unwrap(), ReplicaPolicy::Master);
        assert_eq!(
            "Master-Proles".parse::<ReplicaPolicy>().unwrap(),
            ReplicaPolicy::MasterProles
        );
        assert!("sequence".parse::<ReplicaPolicy>().is_err());
    }
}
