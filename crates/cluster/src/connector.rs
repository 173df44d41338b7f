//! Opens authenticated connections.
//!
//! One `Connector` is shared by the cluster, every node and every pool, so
//! a password change is seen by all connections opened afterwards.

use std::sync::Arc;

use corelib::{Error, Host, Result, VersionedCell};
use info::{Connection, TlsConnector};
use tracing::debug;

use crate::policy::ClientPolicy;

#[derive(Debug, Clone, Default)]
struct Credentials {
    user: String,
    password: Vec<u8>,
}

/// Dials and logs in to nodes using the client policy.
pub struct Connector {
    policy: Arc<ClientPolicy>,
    tls: Option<TlsConnector>,
    credentials: VersionedCell<Credentials>,
}

impl Connector {
    /// Builds the connector, including the TLS configuration when enabled.
    pub fn new(policy: Arc<ClientPolicy>) -> Result<Self> {
        let tls = policy.tls.as_ref().map(|t| t.build_connector()).transpose()?;
        let credentials = Credentials {
            user: policy.user.clone(),
            password: policy.password.clone().into_bytes(),
        };
        Ok(Self {
            policy,
            tls,
            credentials: VersionedCell::new(credentials),
        })
    }

    /// The policy this connector was built from.
    pub fn policy(&self) -> &Arc<ClientPolicy> {
        &self.policy
    }

    /// Opens a connection to `host` and authenticates it when required.
    pub async fn connect(&self, host: &Host) -> Result<Connection> {
        let mut conn = Connection::connect(host, self.policy.timeout, self.tls.as_ref()).await?;
        conn.set_idle_timeout(Some(self.policy.idle_timeout));

        if self.policy.requires_authentication() {
            if let Err(e) = self.authenticate(&mut conn).await {
                debug!(host = %host, error = %e, "authentication failed");
                conn.close().await;
                return Err(e);
            }
        }
        Ok(conn)
    }

    async fn authenticate(&self, conn: &mut Connection) -> Result<()> {
        let Some(authenticator) = &self.policy.authenticator else {
            return Err(Error::NotAuthenticated(
                "user is set but no authenticator is configured".into(),
            ));
        };
        let credentials = self.credentials.load();
        authenticator
            .authenticate(conn, &credentials.user, &credentials.password)
            .await
    }

    /// Replaces the password used for new connections, but only if `user`
    /// is the configured user. Returns whether the password changed.
    pub fn change_password(&self, user: &str, password: &str) -> bool {
        self.credentials
            .try_update(|current| {
                if current.user != user {
                    return Err(());
                }
                Ok(Credentials {
                    user: current.user.clone(),
                    password: password.as_bytes().to_vec(),
                })
            })
            .is_ok()
    }

    /// Password currently used for new connections.
    pub fn password(&self) -> Vec<u8> {
        self.credentials.load().password.clone()
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("tls", &self.tls.is_some())
            .finish()
    }
}
