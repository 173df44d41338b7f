//! Client configuration.
//!
//! `ClientPolicy` is plain data: it can be built in code or loaded from a
//! JSON file, and every field has a default so partial files are fine.
//! Durations are written in milliseconds.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use corelib::{Error, Result};
use info::{Authenticator, TlsPolicy};
use serde::{Deserialize, Serialize};

/// Shortest allowed pause between two tend cycles.
pub const MIN_TEND_INTERVAL: Duration = Duration::from_millis(10);

/// Settings shared by a cluster and all of its nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientPolicy {
    /// User name. Authentication runs only when this is non-empty.
    pub user: String,

    /// Password for `user`.
    pub password: String,

    /// Logs new connections in. Required when `user` is set.
    #[serde(skip)]
    pub authenticator: Option<Arc<dyn Authenticator>>,

    /// Bound on connecting, every info round-trip, seeding and
    /// stabilization.
    #[serde(with = "millis")]
    pub timeout: Duration,

    /// Pooled connections unused for this long are closed. Zero disables.
    #[serde(with = "millis")]
    pub idle_timeout: Duration,

    /// Pause between tend cycles (clamped to `MIN_TEND_INTERVAL`).
    #[serde(with = "millis")]
    pub tend_interval: Duration,

    /// Per-node pool capacity.
    pub connection_queue_size: usize,

    /// Never open more than `connection_queue_size` connections per node.
    pub limit_connections_to_queue_size: bool,

    /// Fail construction when no node could be reached.
    pub fail_if_not_connected: bool,

    /// Expected cluster name. Nodes reporting another name are rejected.
    pub cluster_name: Option<String>,

    /// Track prole owners (`replicas-all`) as well as masters.
    pub request_prole_replicas: bool,

    /// Connect over TLS when set.
    pub tls: Option<TlsPolicy>,

    /// Address translation for hosts learned from `services`.
    pub ip_map: HashMap<String, String>,

    /// Use the alternate address lists advertised by the nodes.
    pub use_services_alternate: bool,

    /// Node removal thresholds.
    pub removal: RemovalPolicy,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            authenticator: None,
            timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(55),
            tend_interval: Duration::from_secs(1),
            connection_queue_size: 256,
            limit_connections_to_queue_size: true,
            fail_if_not_connected: true,
            cluster_name: None,
            request_prole_replicas: true,
            tls: None,
            ip_map: HashMap::new(),
            use_services_alternate: false,
            removal: RemovalPolicy::default(),
        }
    }
}

impl ClientPolicy {
    /// Parses a JSON policy.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Parse(format!("invalid client policy: {e}")))
    }

    /// Reads a JSON policy file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| Error::Parse(format!("{}: {e}", path.display())))
    }

    /// Returns true when new connections must be authenticated.
    pub fn requires_authentication(&self) -> bool {
        !self.user.is_empty()
    }

    /// Tend interval with the floor applied.
    pub fn tend_period(&self) -> Duration {
        self.tend_interval.max(MIN_TEND_INTERVAL)
    }

    /// Info command listing peer addresses (legacy mode).
    pub fn service_string(&self) -> &'static str {
        if self.use_services_alternate {
            "services-alternate"
        } else {
            "services"
        }
    }

    /// Info command listing peers with their names and TLS names.
    pub fn peers_string(&self) -> &'static str {
        match (self.tls.is_some(), self.use_services_alternate) {
            (false, false) => "peers-clear-std",
            (false, true) => "peers-clear-alt",
            (true, false) => "peers-tls-std",
            (true, true) => "peers-tls-alt",
        }
    }

    /// Applies `ip_map` to an address learned from a node.
    pub fn translate(&self, name: &str) -> String {
        self.ip_map
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// When the tend engine gives up on a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalPolicy {
    /// Consecutive failures before the only node is dropped.
    pub single_node_max_failures: u32,

    /// Failures tolerated by a node in a larger cluster when no node at
    /// all refreshed successfully.
    pub multi_node_max_failures: u32,

    /// Successful refreshes a two-node cluster needs before it may drop the
    /// other node.
    pub two_node_refresh_count: usize,
}

impl Default for RemovalPolicy {
    fn default() -> Self {
        Self {
            single_node_max_failures: 5,
            multi_node_max_failures: 5,
            two_node_refresh_count: 1,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
