//! Subcommands and their rendering.
//!
//! Each command reads the published snapshots of a connected [`Cluster`]
//! and renders a plain-text report.

use std::fmt::Write;
use std::time::Duration;

use clap::Subcommand;
use cluster::Cluster;
use corelib::{Key, ReplicaPolicy, PARTITIONS};

/// Output of one command.
pub type CommandResult = anyhow::Result<String>;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the tended nodes
    Nodes,

    /// Per-node partition ownership for each namespace
    Partitions {
        /// Only this namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Print every `namespace,replica,partition,node` entry instead
        #[arg(long)]
        dump: bool,
    },

    /// Show which node serves a key
    Route {
        namespace: String,
        set: String,
        key: String,

        /// master, master_proles or random
        #[arg(short, long, default_value = "master")]
        replica: ReplicaPolicy,

        /// Treat the key as an integer
        #[arg(long)]
        integer: bool,
    },

    /// Report migrations, optionally waiting for them to finish
    Migrations {
        /// Wait up to this many milliseconds for migrations to finish
        #[arg(short, long)]
        wait_ms: Option<u64>,
    },

    /// Cluster-wide feature support
    Features,
}

impl Command {
    pub async fn execute(&self, cluster: &Cluster) -> CommandResult {
        match self {
            Command::Nodes => Ok(nodes(cluster)),
            Command::Partitions { namespace: _, dump: true } => Ok(cluster.partitions().to_string()),
            Command::Partitions { namespace, dump: false } => Ok(partitions(cluster, namespace.as_deref())),
            Command::Route {
                namespace,
                set,
                key,
                replica,
                integer,
            } => route(cluster, namespace, set, key, *replica, *integer),
            Command::Migrations { wait_ms } => migrations(cluster, *wait_ms).await,
            Command::Features => Ok(features(cluster)),
        }
    }
}

fn nodes(cluster: &Cluster) -> String {
    let nodes = cluster.nodes();
    let mut out = format!("{} node(s)\n", nodes.len());
    for node in nodes.iter() {
        let aliases: Vec<String> = node.aliases().iter().map(ToString::to_string).collect();
        let _ = writeln!(
            out,
            "{:<20} {:<24} partition-gen={} peers={} conns={} aliases=[{}]",
            node.name(),
            node.host().to_string(),
            node.partition_generation(),
            node.peers_count(),
            node.connection_count(),
            aliases.join(", ")
        );
    }
    out
}

fn partitions(cluster: &Cluster, only: Option<&str>) -> String {
    let map = cluster.partitions();
    let nodes = cluster.nodes();
    let mut namespaces: Vec<&str> = map.namespaces().filter(|ns| only.map_or(true, |o| o == *ns)).collect();
    namespaces.sort_unstable();

    let mut out = String::new();
    for ns in namespaces {
        let _ = writeln!(out, "{ns} (replicas={})", map.replica_count(ns));
        let Some(replicas) = map.replicas(ns) else {
            continue;
        };
        for (index, owners) in replicas.iter().enumerate() {
            let unowned = owners.iter().filter(|o| o.is_none()).count();
            let _ = writeln!(out, "  replica {index}: {unowned}/{PARTITIONS} unowned");
            for node in nodes.iter() {
                let owned = owners
                    .iter()
                    .filter(|o| o.as_ref().is_some_and(|n| std::sync::Arc::ptr_eq(n, node)))
                    .count();
                let _ = writeln!(out, "    {:<20} {owned}", node.name());
            }
        }
    }
    if out.is_empty() {
        out.push_str("no partition map\n");
    }
    out
}

fn route(
    cluster: &Cluster,
    namespace: &str,
    set: &str,
    key: &str,
    replica: ReplicaPolicy,
    integer: bool,
) -> CommandResult {
    let key = if integer {
        let value: i64 = key.parse().map_err(|_| anyhow::anyhow!("`{key}` is not an integer"))?;
        Key::new(namespace, set, value)
    } else {
        Key::new(namespace, set, key)
    };
    let partition = key.partition();
    let node = cluster.read_node(&partition, replica)?;

    Ok(format!(
        "{key} -> partition {} -> {} ({}, {replica})",
        partition.partition_id,
        node.name(),
        node.host()
    ))
}

async fn migrations(cluster: &Cluster, wait_ms: Option<u64>) -> CommandResult {
    let timeout = cluster.policy().timeout;
    if let Some(ms) = wait_ms {
        cluster.wait_until_migration_finished(Duration::from_millis(ms)).await?;
        return Ok("migrations finished".to_string());
    }

    let in_progress = cluster.migration_in_progress(timeout).await?;
    Ok(if in_progress {
        "migrations in progress".to_string()
    } else {
        "no migrations".to_string()
    })
}

fn features(cluster: &Cluster) -> String {
    let flags = [
        ("float", cluster.supports_float()),
        ("batch-index", cluster.supports_batch_index()),
        ("replicas-all", cluster.supports_replicas_all()),
        ("geo", cluster.supports_geo()),
        ("prole-replicas", cluster.request_prole_replicas()),
    ];
    flags
        .iter()
        .map(|(name, on)| format!("{name:<16} {}", if *on { "yes" } else { "no" }))
        .collect::<Vec<_>>()
        .join("\n")
}
