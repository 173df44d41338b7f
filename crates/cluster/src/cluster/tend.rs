//! The tend cycle.
//!
//! # Algorithm
//!
//! 1. Seed when the node list is empty
//! 2. Refresh every node concurrently
//! 3. Re-fetch peer lists when a peers generation moved or a node failed
//! 4. Validate unknown peers (or legacy friend hosts) and refresh the
//!    partitions of nodes whose generation moved, behind one barrier
//! 5. Remove dead nodes, add new ones, republish the lookup tables
//! 6. Merge all new partition maps into one copy and publish it
//!
//! Every stage fans out one task per node and joins before the next
//! stage starts. Cycles never overlap: `tend` holds the tend lock.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use corelib::{Error, Host, NodeFeatures, Result};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::Cluster;
use crate::node::Node;
use crate::node_validator::{NodeValidator, ValidatedNode};
use crate::peers::{Peer, Peers};
use crate::removal::find_nodes_to_remove;

impl Cluster {
    /// Runs one tend cycle. Waits for a cycle already in progress.
    pub async fn tend(self: &Arc<Self>) -> Result<()> {
        let _guard = self.tend_lock.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let started = Instant::now();
        let result = self.tend_once().await;
        metrics::histogram!("cluster_tend_duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn tend_once(self: &Arc<Self>) -> Result<()> {
        let mut nodes = self.nodes();
        let count_before = nodes.len();

        if nodes.is_empty() {
            info!("no nodes available, seeding");
            self.seed_nodes().await?;
            nodes = self.nodes();
        }

        let peers = Arc::new(Peers::new());
        for node in nodes.iter() {
            node.reset_for_tend();
            if !node.features().peers {
                peers.disable_peers();
            }
        }

        // Refresh every node.
        let mut tasks = JoinSet::new();
        for node in nodes.iter() {
            let node = Arc::clone(node);
            let peers = Arc::clone(&peers);
            tasks.spawn(async move {
                if let Err(e) = node.refresh(&peers).await {
                    debug!(node = %node, error = %e, "refresh failed");
                }
            });
        }
        join_all(&mut tasks).await;

        // Re-fetch peer lists when membership may have changed.
        if peers.use_peers() && (peers.gen_changed() || peers.refresh_count() != count_before) {
            peers.reset_refresh_count();
            peers.mark_peers_refreshed();
            for node in nodes.iter() {
                let node = Arc::clone(node);
                let peers = Arc::clone(&peers);
                tasks.spawn(async move { node.refresh_peers(&peers).await });
            }
            join_all(&mut tasks).await;
        }

        // Discover new nodes and refresh partitions behind one barrier.
        let request_proles = self.request_prole_replicas();
        if peers.use_peers() {
            for peer in peers.peers() {
                if self.peer_exists(&peers, &peer.node_name) {
                    continue;
                }
                let cluster = Arc::clone(self);
                let peers = Arc::clone(&peers);
                tasks.spawn(async move { cluster.add_peer(peer, &peers, request_proles).await });
            }
        } else {
            let aliases = self.aliases();
            for host in peers.friends() {
                if let Some(node) = aliases.get(&host) {
                    node.increment_reference();
                    continue;
                }
                if !peers.add_host(host.clone()) {
                    continue;
                }
                let cluster = Arc::clone(self);
                let peers = Arc::clone(&peers);
                tasks.spawn(async move { cluster.add_friend(host, &peers, request_proles).await });
            }
        }
        for node in nodes.iter().filter(|n| n.partition_changed()) {
            let node = Arc::clone(node);
            let peers = Arc::clone(&peers);
            tasks.spawn(async move { node.refresh_partitions(&peers, request_proles).await });
        }
        join_all(&mut tasks).await;

        // Membership changes.
        let mut tables_changed = peers.aliases_changed();
        if peers.peers_refreshed() || !peers.use_peers() {
            let remove = find_nodes_to_remove(
                &self.nodes(),
                peers.refresh_count(),
                &self.partitions(),
                &self.policy.removal,
            );
            if !remove.is_empty() {
                self.remove_nodes(&remove);
                tables_changed = true;
            }
        }

        let added = peers.take_nodes();
        if !added.is_empty() {
            self.add_nodes(added);
        } else if tables_changed {
            self.rebuild_tables();
        }

        self.aggregate_features();
        self.publish_partitions();

        let count_after = self.nodes().len();
        metrics::gauge!("cluster_nodes").set(count_after as f64);
        if count_after != count_before {
            info!(before = count_before, after = count_after, "live node count changed");
        }
        Ok(())
    }

    /// Returns true if a node named `name` is already known, counting the
    /// reference.
    fn peer_exists(&self, peers: &Peers, name: &str) -> bool {
        let node = self
            .nodes_map
            .load()
            .get(name)
            .cloned()
            .or_else(|| peers.node_by_name(name));
        match node {
            Some(node) => {
                node.increment_reference();
                true
            }
            None => false,
        }
    }

    /// Validates an advertised peer host by host; the first answer becomes
    /// a new node.
    async fn add_peer(self: Arc<Self>, peer: Peer, peers: &Peers, request_proles: bool) {
        let validator = NodeValidator::new(&self.connector);
        for host in &peer.hosts {
            let validated = match validator.validate_alias(host).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(host = %host, error = %e, "adding peer failed");
                    continue;
                }
            };

            if validated.name != peer.node_name {
                warn!(
                    peer = %peer.node_name,
                    actual = %validated.name,
                    host = %host,
                    "peer name differs from the node that answered"
                );
            }
            if self.peer_exists(peers, &validated.name) {
                discard(validated).await;
                return;
            }

            self.register_new_node(validated, peers, request_proles).await;
            return;
        }
    }

    /// Validates a host from a legacy services list.
    async fn add_friend(self: Arc<Self>, host: Host, peers: &Peers, request_proles: bool) {
        let validator = NodeValidator::new(&self.connector);
        let validated = match validator.validate(&host).await {
            Ok(v) => v,
            Err(e) => {
                warn!(host = %host, error = %e, "adding node failed");
                return;
            }
        };

        // Same node reached through another address.
        if let Some(node) = peers.node_by_name(&validated.name) {
            node.add_alias(host);
            peers.mark_aliases_changed();
            discard(validated).await;
            return;
        }
        let existing = self.nodes_map.load().get(&validated.name).cloned();
        if let Some(node) = existing {
            node.add_alias(host);
            node.increment_reference();
            peers.mark_aliases_changed();
            discard(validated).await;
            return;
        }

        self.register_new_node(validated, peers, request_proles).await;
    }

    async fn register_new_node(&self, validated: ValidatedNode, peers: &Peers, request_proles: bool) {
        let node = Node::new(validated, Arc::clone(&self.connector));
        if !peers.add_node(Arc::clone(&node)) {
            node.close();
            return;
        }
        info!(node = %node, "adding node");
        node.refresh_partitions(peers, request_proles).await;
    }

    // ------------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------------

    /// Validates every seed concurrently and adds the nodes that answer.
    ///
    /// Succeeds as soon as one seed answers; seeds still validating keep
    /// going in the background until the policy timeout and join the
    /// cluster when they answer. Fails with the first authentication or
    /// cluster-name error, otherwise with every seed's failure folded into
    /// one error.
    pub(crate) async fn seed_nodes(self: &Arc<Self>) -> Result<()> {
        let seeds = self.seeds();
        info!(seeds = seeds.len(), "seeding the cluster");
        if seeds.is_empty() {
            return Err(Error::connection("<none>", "no seeds configured"));
        }

        let mut tasks: SeedTasks = JoinSet::new();
        for seed in seeds.iter().cloned() {
            let connector = Arc::clone(&self.connector);
            tasks.spawn(async move {
                let result = NodeValidator::new(&connector).validate(&seed).await;
                (seed, result)
            });
        }

        let mut errors = Vec::new();
        let deadline = tokio::time::sleep(self.policy.timeout);
        tokio::pin!(deadline);

        loop {
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = &mut deadline => {
                    errors.push(Error::Timeout("seeding the cluster".into()));
                    break;
                }
            };
            let Some(joined) = joined else { break };

            match joined {
                Ok((_, Ok(validated))) => {
                    self.add_seed_node(validated);
                    if !tasks.is_empty() {
                        let late = finish_seeding(Arc::downgrade(self), tasks, deadline.deadline());
                        tokio::spawn(late);
                    }
                    return Ok(());
                }
                Ok((seed, Err(e))) => {
                    warn!(seed = %seed, error = %e, "seed failed");
                    errors.push(e);
                }
                Err(e) => errors.push(Error::InvalidNode(format!("seed task failed: {e}"))),
            }
        }
        tasks.abort_all();

        if let Some(pos) = errors.iter().position(Error::aborts_seeding) {
            return Err(errors.swap_remove(pos));
        }
        let seeds: Vec<String> = seeds.iter().map(ToString::to_string).collect();
        let reasons: Vec<String> = errors.iter().map(ToString::to_string).collect();
        Err(Error::connection(seeds.join(","), reasons.join("; ")))
    }

    fn add_seed_node(&self, validated: ValidatedNode) {
        let node = Node::new(validated, Arc::clone(&self.connector));
        info!(node = %node, "seed node added");
        self.add_nodes(vec![node]);
    }

    /// Tends until two consecutive cycles see the same node count, bounded
    /// by the policy timeout. When the count settles at zero, the last tend
    /// error is returned.
    pub(crate) async fn wait_till_stabilized(self: &Arc<Self>) -> Result<()> {
        let stabilize = async {
            let mut count: Option<usize> = None;
            let mut last_error = None;
            loop {
                match self.tend().await {
                    Ok(()) => last_error = None,
                    Err(e) if e.aborts_seeding() => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "tend failed while stabilizing");
                        last_error = Some(e);
                    }
                }

                let current = self.nodes().len();
                if count == Some(current) {
                    return match last_error {
                        Some(e) if current == 0 => Err(e),
                        _ => Ok(()),
                    };
                }
                count = Some(current);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };

        tokio::time::timeout(self.policy.timeout, stabilize)
            .await
            .map_err(|_| Error::Timeout("connecting to the cluster".into()))?
    }

    // ------------------------------------------------------------------------
    // Publication
    // ------------------------------------------------------------------------

    pub(crate) fn add_nodes(&self, add: Vec<Arc<Node>>) {
        self.nodes.update(|current| {
            let mut next = current.clone();
            for node in &add {
                if next.iter().any(|n| n.name() == node.name()) {
                    node.close();
                    continue;
                }
                debug!(node = %node, "node joined");
                next.push(Arc::clone(node));
            }
            next
        });
        self.rebuild_tables();
    }

    fn remove_nodes(&self, remove: &[Arc<Node>]) {
        for node in remove {
            info!(node = %node, "removing node");
            node.close();
        }
        self.nodes.update(|current| {
            current
                .iter()
                .filter(|n| !remove.iter().any(|r| Arc::ptr_eq(r, n)))
                .cloned()
                .collect()
        });
        self.rebuild_tables();
    }

    fn rebuild_tables(&self) {
        let nodes = self.nodes();
        let mut names = HashMap::with_capacity(nodes.len());
        let mut aliases = HashMap::new();
        for node in nodes.iter() {
            names.insert(node.name().to_string(), Arc::clone(node));
            for alias in node.aliases().iter() {
                aliases.insert(alias.clone(), Arc::clone(node));
            }
        }
        self.nodes_map.store(names);
        self.aliases.store(aliases);
    }

    pub(crate) fn aggregate_features(&self) {
        let features = self
            .nodes()
            .iter()
            .fold(NodeFeatures::all(), |acc, n| acc.intersect(n.features()));

        self.supports_float.store(features.float, Ordering::Release);
        self.supports_batch_index.store(features.batch_index, Ordering::Release);
        self.supports_replicas_all.store(features.replicas_all, Ordering::Release);
        self.supports_geo.store(features.geo, Ordering::Release);

        let request_proles = self.policy.request_prole_replicas && features.replicas_all;
        let previous = self.request_prole_replicas.swap(request_proles, Ordering::AcqRel);
        if self.policy.request_prole_replicas && previous && !request_proles {
            warn!("some nodes do not support replicas-all, tracking masters only");
        }
    }

    /// Merges every partition map fetched this cycle into one new version.
    fn publish_partitions(&self) {
        let updates: Vec<_> = self
            .nodes()
            .iter()
            .filter_map(|n| n.take_pending_partitions())
            .collect();
        if updates.is_empty() {
            return;
        }

        self.partitions.update(|current| {
            let mut next = current.clone();
            for update in &updates {
                next.merge(update);
            }
            next
        });
        debug!(updates = updates.len(), "published partition map");
    }
}

type SeedTasks = JoinSet<(Host, Result<ValidatedNode>)>;

/// Adds the seeds that answer after seeding already succeeded. Each one
/// joins between tend cycles; nothing is added once the cluster closed.
async fn finish_seeding(cluster: Weak<Cluster>, mut tasks: SeedTasks, deadline: Instant) {
    loop {
        let joined = match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(joined)) => joined,
            Ok(None) => break,
            Err(_) => {
                debug!(pending = tasks.len(), "late seeds timed out");
                break;
            }
        };

        match joined {
            Ok((_, Ok(validated))) => {
                let Some(cluster) = cluster.upgrade() else { break };
                let _guard = cluster.tend_lock.lock().await;
                if cluster.closed.load(Ordering::Acquire) {
                    break;
                }
                cluster.add_seed_node(validated);
            }
            Ok((seed, Err(e))) => debug!(seed = %seed, error = %e, "late seed failed"),
            Err(e) => warn!(error = %e, "seed task failed"),
        }
    }
    tasks.abort_all();
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "tend task failed");
        }
    }
}

async fn discard(validated: ValidatedNode) {
    if let Some(conn) = validated.conn {
        conn.close().await;
    }
}
