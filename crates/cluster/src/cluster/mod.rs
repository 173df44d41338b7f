//! The cluster handle.
//!
//! A `Cluster` keeps four published snapshots (seeds, alias table, name
//! table and node list) plus the partition map, each in a
//! [`VersionedCell`]. Readers load a snapshot and never block; only the
//! tend cycle writes them.
//!
//! # Architecture
//!
//! ```text
//!  application ──► read_node(partition, policy) ──► partitions.load()
//!                                                     nodes.load()
//!
//!  tend task ──► tend() ──► refresh nodes ──► peers ──► partitions
//!                             │                           │
//!                             └──── nodes.update ◄────────┴─► partitions.update
//! ```

mod tend;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use corelib::{Error, Host, Partition, PartitionMap, ReplicaPolicy, Result, VersionedCell};
use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connector::Connector;
use crate::node::Node;
use crate::policy::ClientPolicy;

/// Pause between two cluster-wide migration probes while waiting.
const MIGRATION_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A tended view of a server cluster.
pub struct Cluster {
    policy: Arc<ClientPolicy>,
    connector: Arc<Connector>,

    seeds: VersionedCell<Vec<Host>>,
    aliases: VersionedCell<HashMap<Host, Arc<Node>>>,
    nodes_map: VersionedCell<HashMap<String, Arc<Node>>>,
    nodes: VersionedCell<Vec<Arc<Node>>>,
    partitions: VersionedCell<PartitionMap<Node>>,

    node_index: AtomicUsize,
    replica_index: AtomicUsize,

    supports_float: AtomicBool,
    supports_batch_index: AtomicBool,
    supports_replicas_all: AtomicBool,
    supports_geo: AtomicBool,
    request_prole_replicas: AtomicBool,

    closed: AtomicBool,
    shutdown: CancellationToken,
    tend_lock: tokio::sync::Mutex<()>,
    tend_task: Mutex<Option<JoinHandle<()>>>,
}

impl Cluster {
    /// Connects to the cluster through `hosts` and starts tending it.
    ///
    /// Waits until the node count settles (bounded by `policy.timeout`).
    /// Fails when credentials are rejected, or when no node could be
    /// reached and `policy.fail_if_not_connected` is set; otherwise the
    /// handle is returned and the tend loop keeps trying the seeds.
    pub async fn new(policy: ClientPolicy, hosts: &[Host]) -> Result<Arc<Self>> {
        let seeds = seed_hosts(&policy, hosts);
        let cluster = Arc::new(Self::unseeded(policy, seeds)?);

        if let Err(e) = cluster.wait_till_stabilized().await {
            warn!(error = %e, "cluster did not stabilize");
            if e.is_not_authenticated()
                || (cluster.policy.fail_if_not_connected && !cluster.is_connected())
            {
                cluster.close().await;
                return Err(e);
            }
        }

        if cluster.policy.fail_if_not_connected && !cluster.is_connected() {
            let seeds: Vec<String> = cluster.seeds().iter().map(ToString::to_string).collect();
            cluster.close().await;
            return Err(Error::connection(seeds.join(","), "failed to connect to any seed"));
        }

        info!(nodes = cluster.nodes().len(), "cluster connected");
        cluster.spawn_tend_loop();
        Ok(cluster)
    }

    pub(crate) fn unseeded(policy: ClientPolicy, seeds: Vec<Host>) -> Result<Self> {
        let policy = Arc::new(policy);
        let connector = Arc::new(Connector::new(Arc::clone(&policy))?);
        let request_proles = policy.request_prole_replicas;

        Ok(Self {
            policy,
            connector,
            seeds: VersionedCell::new(seeds),
            aliases: VersionedCell::default(),
            nodes_map: VersionedCell::default(),
            nodes: VersionedCell::default(),
            partitions: VersionedCell::new(PartitionMap::new()),
            // random start offset per client
            node_index: AtomicUsize::new(rand::random::<u16>() as usize),
            replica_index: AtomicUsize::new(0),
            supports_float: AtomicBool::new(false),
            supports_batch_index: AtomicBool::new(false),
            supports_replicas_all: AtomicBool::new(false),
            supports_geo: AtomicBool::new(false),
            request_prole_replicas: AtomicBool::new(request_proles),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tend_lock: tokio::sync::Mutex::new(()),
            tend_task: Mutex::new(None),
        })
    }

    fn spawn_tend_loop(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let period = self.policy.tend_period();
        let handle = tokio::spawn(tend_loop(weak, shutdown, period));
        *self.tend_task.lock() = Some(handle);
    }

    // ------------------------------------------------------------------------
    // Replica selection
    // ------------------------------------------------------------------------

    /// Picks the node to read `partition` from.
    pub fn read_node(&self, partition: &Partition, replica: ReplicaPolicy) -> Result<Arc<Node>> {
        match replica {
            ReplicaPolicy::Master => self.master_node(partition),
            ReplicaPolicy::MasterProles => self.master_prole_node(partition),
            ReplicaPolicy::Random => self.random_node(),
        }
    }

    /// Owner of the master replica, or a random node when it is unknown or
    /// inactive.
    pub fn master_node(&self, partition: &Partition) -> Result<Arc<Node>> {
        let partitions = self.partitions.load();
        if let Some(node) = partitions.master(partition) {
            if node.is_active() {
                return Ok(Arc::clone(node));
            }
        }
        self.random_node()
    }

    /// Rotates through the replicas of `partition` and returns the first
    /// active owner, or a random node.
    pub fn master_prole_node(&self, partition: &Partition) -> Result<Arc<Node>> {
        let partitions = self.partitions.load();
        if let Some(replicas) = partitions.replicas(&partition.namespace) {
            for _ in 0..replicas.len() {
                let index = self.replica_index.fetch_add(1, Ordering::Relaxed) % replicas.len();
                if let Some(node) = replicas[index].get(partition.partition_id).and_then(Option::as_ref) {
                    if node.is_active() {
                        return Ok(Arc::clone(node));
                    }
                }
            }
        }
        self.random_node()
    }

    /// Any active node, round-robin.
    pub fn random_node(&self) -> Result<Arc<Node>> {
        let nodes = self.nodes.load();
        for _ in 0..nodes.len() {
            let index = self.node_index.fetch_add(1, Ordering::Relaxed) % nodes.len();
            let node = &nodes[index];
            if node.is_active() {
                return Ok(Arc::clone(node));
            }
        }
        Err(Error::no_available_node())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Adds seeds used the next time the cluster has no nodes.
    pub fn add_seeds(&self, hosts: &[Host]) {
        let hosts = seed_hosts(&self.policy, hosts);
        self.seeds.update(|current| {
            let mut next = current.clone();
            next.extend(hosts);
            next
        });
    }

    pub fn seeds(&self) -> Arc<Vec<Host>> {
        self.seeds.load()
    }

    /// Every known address and the node it reaches.
    pub fn aliases(&self) -> Arc<HashMap<Host, Arc<Node>>> {
        self.aliases.load()
    }

    /// The published node list.
    pub fn nodes(&self) -> Arc<Vec<Arc<Node>>> {
        self.nodes.load()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes().iter().map(|n| n.name().to_string()).collect()
    }

    /// Looks a node up by name.
    pub fn get_node_by_name(&self, name: &str) -> Result<Arc<Node>> {
        self.nodes_map
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NoAvailableNode(Some(format!("node {name} not found"))))
    }

    /// Returns true when the cluster has nodes and is not closed.
    pub fn is_connected(&self) -> bool {
        !self.nodes.load().is_empty() && !self.closed.load(Ordering::Acquire)
    }

    /// The published partition map.
    pub fn partitions(&self) -> Arc<PartitionMap<Node>> {
        self.partitions.load()
    }

    pub fn supports_float(&self) -> bool {
        self.supports_float.load(Ordering::Acquire)
    }

    pub fn supports_batch_index(&self) -> bool {
        self.supports_batch_index.load(Ordering::Acquire)
    }

    pub fn supports_replicas_all(&self) -> bool {
        self.supports_replicas_all.load(Ordering::Acquire)
    }

    pub fn supports_geo(&self) -> bool {
        self.supports_geo.load(Ordering::Acquire)
    }

    /// Whether prole ownership is being tracked. False when the policy asks
    /// for it but some node cannot answer `replicas-all`.
    pub fn request_prole_replicas(&self) -> bool {
        self.request_prole_replicas.load(Ordering::Acquire)
    }

    /// Changes the password used for new connections when `user` is the
    /// configured user. Returns whether it changed.
    pub fn change_password(&self, user: &str, password: &str) -> bool {
        self.connector.change_password(user, password)
    }

    pub fn policy(&self) -> &ClientPolicy {
        &self.policy
    }

    // ------------------------------------------------------------------------
    // Migrations
    // ------------------------------------------------------------------------

    /// Returns true if any active node is migrating partitions. Nodes are
    /// probed concurrently; the first `true` answers immediately.
    pub async fn migration_in_progress(&self, timeout: Duration) -> Result<bool> {
        let mut probes = JoinSet::new();
        for node in self.nodes().iter().filter(|n| n.is_active()) {
            let node = Arc::clone(node);
            probes.spawn(async move { node.migration_in_progress().await });
        }

        let collect = async {
            while let Some(joined) = probes.join_next().await {
                match joined {
                    Ok(Ok(true)) => return Ok(true),
                    Ok(Ok(false)) => {}
                    Ok(Err(e)) => return Err(e),
                    Err(e) => return Err(Error::InvalidNode(format!("migration probe failed: {e}"))),
                }
            }
            Ok(false)
        };

        let result = tokio::time::timeout(timeout, collect)
            .await
            .map_err(|_| Error::Timeout("checking for migrations".into()));
        probes.abort_all();
        result?
    }

    /// Waits until no node is migrating, failing with `Timeout` once
    /// `timeout` elapses.
    pub async fn wait_until_migration_finished(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout("waiting for migrations".into()));
            }
            if !self.migration_in_progress(remaining).await? {
                return Ok(());
            }
            tokio::time::sleep(MIGRATION_POLL_INTERVAL.min(remaining)).await;
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stops the tend loop after its current cycle and closes every node.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();

        let task = self.tend_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        // late seeds join under the tend lock
        let _guard = self.tend_lock.lock().await;
        for node in self.nodes().iter() {
            node.close();
        }
        info!("cluster closed");
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for node in self.nodes.load().iter() {
            node.close();
        }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.node_names())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

/// Seeds as dialed. With verified TLS, a seed without a TLS name is checked
/// against the cluster name, or its own name when none is configured.
fn seed_hosts(policy: &ClientPolicy, hosts: &[Host]) -> Vec<Host> {
    let verify = policy.tls.as_ref().is_some_and(|tls| !tls.insecure_skip_verify);
    hosts
        .iter()
        .cloned()
        .map(|mut host| {
            if verify && host.tls_name.is_none() {
                host.tls_name = Some(policy.cluster_name.clone().unwrap_or_else(|| host.name.clone()));
            }
            host
        })
        .collect()
}

async fn tend_loop(cluster: Weak<Cluster>, shutdown: CancellationToken, period: Duration) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }

        let Some(cluster) = cluster.upgrade() else {
            break;
        };

        let started = Instant::now();
        if let Err(e) = cluster.tend().await {
            warn!(error = %e, "tend failed");
        }
        let elapsed = started.elapsed();
        if elapsed > period {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "tend took longer than the tend interval");
        }
    }
    debug!("tend loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::NodeFeatures;
    use info::TlsPolicy;

    fn cluster() -> Cluster {
        Cluster::unseeded(ClientPolicy::default(), Vec::new()).unwrap()
    }

    fn add(cluster: &Cluster, names: &[&str]) -> Vec<Arc<Node>> {
        let nodes: Vec<Arc<Node>> = names
            .iter()
            .map(|n| Node::detached(n, Arc::clone(&cluster.connector)))
            .collect();
        cluster.add_nodes(nodes.clone());
        nodes
    }

    #[test]
    fn test_random_node_empty_cluster() {
        let c = cluster();
        assert!(matches!(c.random_node(), Err(Error::NoAvailableNode(_))));
        assert!(!c.is_connected());
    }

    #[test]
    fn test_random_node_skips_inactive() {
        let c = cluster();
        let nodes = add(&c, &["A", "B", "C"]);
        nodes[0].close();
        nodes[2].close();
        for _ in 0..10 {
            assert_eq!(c.random_node().unwrap().name(), "B");
        }
        nodes[1].close();
        assert!(c.random_node().is_err());
    }

    #[test]
    fn test_master_node_falls_back_to_random() {
        let c = cluster();
        let nodes = add(&c, &["A", "B"]);
        let partition = Partition::new("test", 11);

        let mut map = PartitionMap::new();
        map.set("test", 0, 11, Arc::clone(&nodes[0]));
        c.partitions.store(map);
        assert!(Arc::ptr_eq(&c.master_node(&partition).unwrap(), &nodes[0]));

        nodes[0].close();
        assert!(Arc::ptr_eq(&c.master_node(&partition).unwrap(), &nodes[1]));

        let unknown = Partition::new("other", 11);
        assert_eq!(c.master_node(&unknown).unwrap().name(), "B");
    }

    #[test]
    fn test_master_prole_rotates() {
        let c = cluster();
        let nodes = add(&c, &["A", "B"]);
        let mut map = PartitionMap::new();
        map.set("test", 0, 5, Arc::clone(&nodes[0]));
        map.set("test", 1, 5, Arc::clone(&nodes[1]));
        c.partitions.store(map);

        let partition = Partition::new("test", 5);
        let first = c.read_node(&partition, ReplicaPolicy::MasterProles).unwrap();
        let second = c.read_node(&partition, ReplicaPolicy::MasterProles).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_get_node_by_name() {
        let c = cluster();
        add(&c, &["A"]);
        assert_eq!(c.get_node_by_name("A").unwrap().name(), "A");
        assert!(matches!(c.get_node_by_name("Z"), Err(Error::NoAvailableNode(_))));
        assert_eq!(c.node_names(), ["A"]);
        assert_eq!(c.aliases().len(), 1);
    }

    #[test]
    fn test_seed_tls_names() {
        let mut policy = ClientPolicy::default();
        policy.tls = Some(TlsPolicy::default());
        let seeds = seed_hosts(&policy, &[Host::new("db1", 3000)]);
        assert_eq!(seeds[0].tls_name.as_deref(), Some("db1"));

        policy.cluster_name = Some("prod".into());
        let seeds = seed_hosts(&policy, &[Host::new("db1", 3000), Host::with_tls_name("db2", 3000, "x")]);
        assert_eq!(seeds[0].tls_name.as_deref(), Some("prod"));
        assert_eq!(seeds[1].tls_name.as_deref(), Some("x"));

        policy.tls = Some(TlsPolicy {
            ca_cert: None,
            insecure_skip_verify: true,
        });
        assert_eq!(seed_hosts(&policy, &[Host::new("db1", 3000)])[0].tls_name, None);
    }

    #[test]
    fn test_add_seeds() {
        let c = cluster();
        c.add_seeds(&[Host::new("10.0.0.1", 3000)]);
        c.add_seeds(&[Host::new("10.0.0.2", 3000)]);
        assert_eq!(c.seeds().len(), 2);
    }

    #[test]
    fn test_feature_aggregation() {
        let c = cluster();
        c.aggregate_features();
        // empty cluster: nothing to object
        assert!(c.supports_float());

        let nodes = add(&c, &["A"]);
        assert_eq!(nodes[0].features(), NodeFeatures::all());
        c.aggregate_features();
        assert!(c.request_prole_replicas());
    }
}
