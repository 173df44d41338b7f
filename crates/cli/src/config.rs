//! Command line options and the client policy they produce.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cluster::{ClientPolicy, Cluster};
use corelib::{Host, DEFAULT_PORT};
use info::TlsPolicy;
use tracing::info;

use crate::commands::Command;

#[derive(Parser, Debug)]
#[command(name = "clusterctl", version, about = "Inspect a cluster through the client tend engine")]
pub struct CliConfig {
    /// Seed hosts, comma separated: host[:port] or [v6]:port
    #[arg(short = 'H', long, default_value = "127.0.0.1:3000")]
    pub hosts: String,

    /// Client policy as JSON; flags below override its fields
    #[arg(short, long)]
    pub policy: Option<PathBuf>,

    /// Expected cluster name; nodes reporting another name are rejected
    #[arg(long)]
    pub cluster_name: Option<String>,

    /// Connect with TLS
    #[arg(long)]
    pub tls: bool,

    /// CA certificate (PEM) for TLS; implies --tls
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Skip server certificate verification; implies --tls
    #[arg(long)]
    pub insecure: bool,

    /// Connect and info timeout in milliseconds
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    /// Use the alternate service addresses servers publish
    #[arg(long)]
    pub services_alternate: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "cluster=info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Seeds parsed from `--hosts`.
    pub fn seeds(&self) -> anyhow::Result<Vec<Host>> {
        Host::parse_list(&self.hosts, DEFAULT_PORT).with_context(|| format!("invalid --hosts {:?}", self.hosts))
    }

    /// The client policy: the `--policy` file if given, then flag overrides.
    pub fn client_policy(&self) -> anyhow::Result<ClientPolicy> {
        let mut policy = match &self.policy {
            Some(path) => ClientPolicy::from_file(path)
                .with_context(|| format!("failed to load policy {}", path.display()))?,
            None => ClientPolicy::default(),
        };

        if let Some(name) = &self.cluster_name {
            policy.cluster_name = Some(name.clone());
        }
        if let Some(ms) = self.timeout_ms {
            policy.timeout = Duration::from_millis(ms);
        }
        if self.services_alternate {
            policy.use_services_alternate = true;
        }
        if self.tls || self.ca_cert.is_some() || self.insecure {
            let tls = policy.tls.get_or_insert_with(TlsPolicy::default);
            if let Some(ca) = &self.ca_cert {
                tls.ca_cert = Some(ca.clone());
            }
            if self.insecure {
                tls.insecure_skip_verify = true;
            }
        }

        Ok(policy)
    }

    /// Connects, runs the command and closes the cluster.
    pub async fn run(self) -> anyhow::Result<String> {
        let seeds = self.seeds()?;
        let policy = self.client_policy()?;

        info!(seeds = seeds.len(), "connecting");
        let cluster = Cluster::new(policy, &seeds)
            .await
            .with_context(|| format!("failed to connect to {}", self.hosts))?;

        let result = self.command.execute(&cluster).await;
        cluster.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliConfig {
        CliConfig::try_parse_from(std::iter::once("clusterctl").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["nodes"]);
        assert_eq!(config.seeds().unwrap(), [Host::new("127.0.0.1", 3000)]);

        let policy = config.client_policy().unwrap();
        assert!(policy.tls.is_none());
        assert_eq!(policy.timeout, ClientPolicy::default().timeout);
        assert!(matches!(config.command, Command::Nodes));
    }

    #[test]
    fn test_seed_list() {
        let config = parse(&["-H", "db1,db2:4000", "nodes"]);
        assert_eq!(
            config.seeds().unwrap(),
            [Host::new("db1", 3000), Host::new("db2", 4000)]
        );
    }

    #[test]
    fn test_flag_overrides() {
        let config = parse(&[
            "--cluster-name",
            "prod",
            "--timeout-ms",
            "250",
            "--insecure",
            "--services-alternate",
            "nodes",
        ]);
        let policy = config.client_policy().unwrap();
        assert_eq!(policy.cluster_name.as_deref(), Some("prod"));
        assert_eq!(policy.timeout, Duration::from_millis(250));
        assert!(policy.use_services_alternate);
        assert!(policy.tls.unwrap().insecure_skip_verify);
    }

    #[test]
    fn test_policy_file_missing() {
        let config = parse(&["--policy", "/nonexistent/policy.json", "nodes"]);
        assert!(config.client_policy().is_err());
    }

    #[test]
    fn test_route_arguments() {
        let config = parse(&["route", "test", "users", "alice", "--replica", "master-proles"]);
        match config.command {
            Command::Route {
                namespace,
                set,
                key,
                replica,
                integer,
            } => {
                assert_eq!(namespace, "test");
                assert_eq!(set, "users");
                assert_eq!(key, "alice");
                assert_eq!(replica, corelib::ReplicaPolicy::MasterProles);
                assert!(!integer);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_missing_subcommand() {
        assert!(CliConfig::try_parse_from(["clusterctl"]).is_err());
    }
}
