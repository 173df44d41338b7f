//! Node capability flags.
//!
//! Servers advertise what they support through the `features` info value, a
//! `;` separated token list. The tokens the client cares about are parsed
//! once, when a node is validated, into a small `Copy` struct.

use std::fmt;

/// Capabilities advertised by one server node.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NodeFeatures {
    /// Native float bins.
    pub float: bool,
    /// Batch index protocol.
    pub batch_index: bool,
    /// Answers `replicas-all` (prole ownership).
    pub replicas_all: bool,
    /// Geospatial queries.
    pub geo: bool,
    /// Peer discovery through `peers-*` info commands.
    pub peers: bool,
}

impl NodeFeatures {
    /// Parses a `features` info value. Unknown tokens are ignored.
    pub fn parse(features: &str) -> Self {
        let mut parsed = Self::default();
        for token in features.split(';').map(str::trim) {
            match token {
                "float" => parsed.float = true,
                "batch-index" => parsed.batch_index = true,
                "replicas-all" => parsed.replicas_all = true,
                "geo" => parsed.geo = true,
                "peers" => parsed.peers = true,
                _ => {}
            }
        }
        parsed
    }

    /// Every capability enabled.
    pub fn all() -> Self {
        Self {
            float: true,
            batch_index: true,
            replicas_all: true,
            geo: true,
            peers: true,
        }
    }

    /// Capabilities supported by both `self` and `other`.
    pub fn intersect(self, other: Self) -> Self {
        Self {
            float: self.float && other.float,
            batch_index: self.batch_index && other.batch_index,
            replicas_all: self.replicas_all && other.replicas_all,
            geo: self.geo && other.geo,
            peers: self.peers && other.peers,
        }
    }
}

impl fmt::Display for NodeFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens = Vec::new();
        if self.float {
            tokens.push("float");
        }
        if self.batch_index {
            tokens.push("batch-index");
        }
        if self.replicas_all {
            tokens.push("replicas-all");
        }
        if self.geo {
            tokens.push("geo");
        }
        if self.peers {
            tokens.push("peers");
        }
        write!(f, "{}", tokens.join(";"))
    }
}
