//! Confirms that a host is a usable node before it joins the cluster.

use corelib::{Error, Host, NodeFeatures, Result};
use info::Connection;
use tracing::debug;

use crate::connector::Connector;
use crate::resolver::resolve;

/// Identity of a node that answered the validation probe.
#[derive(Debug)]
pub struct ValidatedNode {
    pub name: String,
    /// The alias that answered.
    pub primary_host: Host,
    pub aliases: Vec<Host>,
    pub features: NodeFeatures,
    /// The probe connection, kept as the node's tend connection.
    pub conn: Option<Connection>,
}

/// Probes hosts on behalf of the cluster.
pub struct NodeValidator<'a> {
    connector: &'a Connector,
}

impl<'a> NodeValidator<'a> {
    pub fn new(connector: &'a Connector) -> Self {
        Self { connector }
    }

    /// Resolves `host` and probes its aliases in order until one answers.
    ///
    /// Authentication and cluster-name failures are returned as such; other
    /// failures are folded into one connection error.
    pub async fn validate(&self, host: &Host) -> Result<ValidatedNode> {
        let aliases = resolve(host).await?;

        let mut failures = Vec::new();
        for alias in &aliases {
            match self.validate_alias(alias).await {
                Ok(mut validated) => {
                    validated.aliases = aliases.clone();
                    return Ok(validated);
                }
                Err(e) => {
                    debug!(alias = %alias, error = %e, "alias validation failed");
                    failures.push(e);
                }
            }
        }

        if let Some(pos) = failures.iter().position(Error::aborts_seeding) {
            return Err(failures.swap_remove(pos));
        }
        let reasons: Vec<String> = failures.iter().map(ToString::to_string).collect();
        Err(Error::connection(host, reasons.join("; ")))
    }

    /// Probes a single address, without DNS expansion.
    pub async fn validate_alias(&self, alias: &Host) -> Result<ValidatedNode> {
        let mut conn = self.connector.connect(alias).await?;

        let cluster_name = self.connector.policy().cluster_name.as_deref();
        let mut names = vec!["node", "features"];
        if cluster_name.is_some() {
            names.push("cluster-name");
        }

        let values = match conn.request_info(&names).await {
            Ok(values) => values,
            Err(e) => {
                conn.close().await;
                return Err(e);
            }
        };

        let name = values.get("node").map(String::as_str).unwrap_or_default();
        if name.is_empty() {
            conn.close().await;
            return Err(Error::InvalidNode(format!("{alias} returned an empty node name")));
        }

        if let Some(expected) = cluster_name {
            let actual = values.get("cluster-name").map(String::as_str).unwrap_or_default();
            if actual != expected {
                conn.close().await;
                return Err(Error::ClusterNameMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        let features = values
            .get("features")
            .map(|f| NodeFeatures::parse(f))
            .unwrap_or_default();

        Ok(ValidatedNode {
            name: name.to_string(),
            primary_host: alias.clone(),
            aliases: vec![alias.clone()],
            features,
            conn: Some(conn),
        })
    }
}
