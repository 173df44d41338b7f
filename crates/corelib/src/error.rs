//! Error types shared by every crate in the workspace.

/// Result type alias for the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while tending or routing to a cluster.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A host could not be reached or the handshake failed.
    #[error("failed to connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server reported a different cluster name than the one configured.
    #[error("cluster name mismatch: expected `{expected}`, server reported `{actual}`")]
    ClusterNameMismatch { expected: String, actual: String },

    /// Credentials were rejected. Seeding never retries this.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// No active node could serve the request.
    #[error("no available node{}", format_detail(.0))]
    NoAvailableNode(Option<String>),

    /// A node answered, but its answers make it unusable.
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// A bounded wait elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An info response could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A host string could not be parsed.
    #[error("invalid host: {0}")]
    InvalidHost(String),

    /// TLS setup or handshake failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The node's connection pool is exhausted.
    #[error("connection pool is empty")]
    PoolEmpty,

    /// The cluster has been closed.
    #[error("cluster is closed")]
    Closed,
}

fn format_detail(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(": {d}"),
        None => String::new(),
    }
}

impl Error {
    /// Creates a `NoAvailableNode` error without detail.
    pub fn no_available_node() -> Self {
        Error::NoAvailableNode(None)
    }

    /// Creates a `Connection` error for the given host.
    pub fn connection(host: impl ToString, reason: impl ToString) -> Self {
        Error::Connection {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for the cluster-name mismatch failure.
    pub fn is_cluster_name_mismatch(&self) -> bool {
        matches!(self, Error::ClusterNameMismatch { .. })
    }

    /// Returns true when credentials were rejected.
    pub fn is_not_authenticated(&self) -> bool {
        matches!(self, Error::NotAuthenticated(_))
    }

    /// Returns true when a bounded wait elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Returns true for transient network failures that the next tend retries.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Io(_) | Error::Tls(_) | Error::Timeout(_)
        )
    }

    /// Returns true for failures that seeding must surface instead of retrying.
    pub fn aborts_seeding(&self) -> bool {
        self.is_not_authenticated() || self.is_cluster_name_mismatch()
    }
}
