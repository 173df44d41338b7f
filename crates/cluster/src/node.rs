//! A live server node as seen by the client.
//!
//! A node owns a reserved tend connection for info requests and a pool of
//! connections for application traffic. Its counters are atomics: the tend
//! cycle resets and reads them while the node's own refresh task updates
//! them and readers check `is_active` from any thread.
//!
//! # Lifecycle
//!
//! 1. Created by the cluster once a validator succeeds
//! 2. Refreshed every tend cycle (`refresh`, then optionally
//!    `refresh_peers` and `refresh_partitions`)
//! 3. Closed when the cluster removes it; a closed node is never reused

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use corelib::{Error, Host, NodeFeatures, PartitionMap, Result};
use info::{parse_name_values, Connection};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connector::Connector;
use crate::node_validator::ValidatedNode;
use crate::partition_parser::{parse_replicas, replicas_command};
use crate::peers::{parse_peers, parse_services, Peers};
use crate::pool::ConnectionPool;

/// Pause between two migration probes while waiting.
const MIGRATION_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One server node.
pub struct Node {
    name: String,
    host: Host,
    aliases: ArcSwap<Vec<Host>>,
    features: NodeFeatures,
    connector: Arc<Connector>,

    tend_conn: tokio::sync::Mutex<Option<Connection>>,
    pool: ConnectionPool,

    peers_generation: AtomicI64,
    peers_count: AtomicUsize,
    partition_generation: AtomicI64,
    partition_changed: AtomicBool,
    pending_partitions: Mutex<Option<PartitionMap<Node>>>,

    reference_count: AtomicUsize,
    failures: AtomicU32,
    active: AtomicBool,
    has_refreshed: AtomicBool,
}

impl Node {
    /// Creates a node from a successful validation. The validation
    /// connection becomes the tend connection.
    pub fn new(validated: ValidatedNode, connector: Arc<Connector>) -> Arc<Self> {
        let ValidatedNode {
            name,
            primary_host,
            aliases,
            features,
            conn,
        } = validated;
        let policy = connector.policy();
        let pool = ConnectionPool::new(
            policy.connection_queue_size,
            policy.limit_connections_to_queue_size,
        );

        Arc::new(Self {
            name,
            host: primary_host,
            aliases: ArcSwap::from_pointee(aliases),
            features,
            connector,
            tend_conn: tokio::sync::Mutex::new(conn),
            pool,
            peers_generation: AtomicI64::new(-1),
            peers_count: AtomicUsize::new(0),
            partition_generation: AtomicI64::new(-1),
            partition_changed: AtomicBool::new(false),
            pending_partitions: Mutex::new(None),
            reference_count: AtomicUsize::new(0),
            failures: AtomicU32::new(0),
            active: AtomicBool::new(true),
            has_refreshed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the node was validated on.
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Every address known to reach this node.
    pub fn aliases(&self) -> Arc<Vec<Host>> {
        self.aliases.load_full()
    }

    /// Adds an address for this node. Existing aliases are left alone.
    pub fn add_alias(&self, alias: Host) {
        self.aliases.rcu(|current| {
            let mut next = Vec::clone(current);
            if !next.contains(&alias) {
                next.push(alias.clone());
            }
            next
        });
    }

    pub fn features(&self) -> NodeFeatures {
        self.features
    }

    /// Returns true until the node is closed or found to have changed name.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Consecutive failed refreshes.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// How many other nodes listed this node during the current cycle.
    pub fn reference_count(&self) -> usize {
        self.reference_count.load(Ordering::Acquire)
    }

    pub fn increment_reference(&self) {
        self.reference_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn partition_generation(&self) -> i64 {
        self.partition_generation.load(Ordering::Acquire)
    }

    pub fn peers_generation(&self) -> i64 {
        self.peers_generation.load(Ordering::Acquire)
    }

    /// Number of peers the node reported last time it was asked.
    pub fn peers_count(&self) -> usize {
        self.peers_count.load(Ordering::Acquire)
    }

    /// Returns true when the node reported a new partition generation this
    /// cycle.
    pub fn partition_changed(&self) -> bool {
        self.partition_changed.load(Ordering::Acquire)
    }

    /// Clears per-cycle counters at the start of a tend cycle.
    pub(crate) fn reset_for_tend(&self) {
        self.reference_count.store(0, Ordering::Release);
        self.partition_changed.store(false, Ordering::Release);
    }

    /// Takes the ownership map fetched this cycle, if any.
    pub(crate) fn take_pending_partitions(&self) -> Option<PartitionMap<Node>> {
        self.pending_partitions.lock().take()
    }

    // ------------------------------------------------------------------------
    // Info requests
    // ------------------------------------------------------------------------

    /// Sends an info request over the tend connection, reconnecting first
    /// if it was lost. A failed request drops the connection.
    ///
    /// Fails with [`Error::InvalidNode`] once the node is inactive; the tend
    /// connection is dropped if the node closed while the request ran.
    pub async fn request_info(&self, names: &[&str]) -> Result<HashMap<String, String>> {
        let mut guard = self.tend_conn.lock().await;
        if !self.is_active() {
            guard.take();
            return Err(self.inactive());
        }

        if !guard.as_ref().is_some_and(Connection::is_connected) {
            *guard = Some(self.connector.connect(&self.host).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(Error::connection(&self.host, "tend connection unavailable"));
        };

        let result = conn.request_info(names).await;
        if result.is_err() || !self.is_active() {
            if let Some(conn) = guard.take() {
                conn.close().await;
            }
        }
        match result {
            Ok(_) if !self.is_active() => Err(self.inactive()),
            result => result,
        }
    }

    fn inactive(&self) -> Error {
        Error::InvalidNode(format!("{self} is not active"))
    }

    /// Checks the node's name and generations, and collects legacy friend
    /// hosts. Increments `peers.refresh_count` on success.
    pub async fn refresh(&self, peers: &Peers) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        let result = if peers.use_peers() {
            self.refresh_with_peers(peers).await
        } else {
            self.refresh_with_services(peers).await
        };
        self.pool.drop_idle();

        match result {
            Ok(()) => {
                self.failures.store(0, Ordering::Release);
                self.has_refreshed.store(true, Ordering::Release);
                peers.increment_refresh_count();
                Ok(())
            }
            Err(e) => {
                self.refresh_failed(&e);
                Err(e)
            }
        }
    }

    async fn refresh_with_peers(&self, peers: &Peers) -> Result<()> {
        let values = self
            .request_info(&["node", "peers-generation", "partition-generation"])
            .await?;
        self.verify_node_name(&values)?;

        let generation = parse_generation(&values, "peers-generation")?;
        if generation != self.peers_generation() {
            peers.mark_gen_changed();
        }

        self.verify_partition_generation(&values)
    }

    async fn refresh_with_services(&self, peers: &Peers) -> Result<()> {
        let policy = self.connector.policy();
        let services = policy.service_string();
        let values = self
            .request_info(&["node", "partition-generation", services])
            .await?;
        self.verify_node_name(&values)?;
        self.verify_partition_generation(&values)?;

        let friends = values.get(services).map(|v| parse_services(v)).unwrap_or_default();
        self.peers_count.store(friends.len(), Ordering::Release);
        for friend in friends {
            let name = policy.translate(&friend.name);
            peers.add_friend(Host::new(name, friend.port));
        }
        Ok(())
    }

    fn verify_node_name(&self, values: &HashMap<String, String>) -> Result<()> {
        let name = values.get("node").map(String::as_str).unwrap_or_default();
        if name.is_empty() {
            return Err(Error::InvalidNode(format!("{self}: node name is empty")));
        }
        if name != self.name {
            self.active.store(false, Ordering::Release);
            return Err(Error::InvalidNode(format!(
                "node name changed from {} to {name}",
                self.name
            )));
        }
        Ok(())
    }

    fn verify_partition_generation(&self, values: &HashMap<String, String>) -> Result<()> {
        let generation = parse_generation(values, "partition-generation")?;
        if generation != self.partition_generation() {
            self.partition_changed.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Fetches this node's peer list into `peers`. Skipped if the node
    /// already failed this cycle.
    pub async fn refresh_peers(&self, peers: &Peers) {
        if self.failures() > 0 || !self.is_active() {
            return;
        }

        let command = self.connector.policy().peers_string();
        let result = async {
            let values = self.request_info(&[command]).await?;
            let value = values.get(command).map(String::as_str).unwrap_or_default();
            parse_peers(value)
        }
        .await;

        match result {
            Ok((generation, list)) => {
                debug!(node = %self, peers = list.len(), generation, "refreshed peers");
                self.peers_count.store(list.len(), Ordering::Release);
                self.peers_generation.store(generation, Ordering::Release);
                peers.append_peers(list);
                peers.increment_refresh_count();
            }
            Err(e) => self.refresh_failed(&e),
        }
    }

    /// Fetches this node's partition ownership when its generation moved.
    ///
    /// Skipped when the node failed this cycle, or when it reports no peers
    /// while other nodes refreshed: a node that believes it is alone would
    /// otherwise claim every partition. Nodes that never completed a refresh
    /// are exempt from the peer check.
    pub async fn refresh_partitions(self: &Arc<Self>, peers: &Peers, request_proles: bool) {
        if self.failures() > 0 || !self.is_active() {
            return;
        }
        if self.has_refreshed.load(Ordering::Acquire)
            && self.peers_count() == 0
            && peers.refresh_count() > 1
        {
            debug!(node = %self, "skipping partition refresh of node without peers");
            return;
        }

        let command = replicas_command(request_proles && self.features.replicas_all);
        let result = async {
            let values = self.request_info(&["partition-generation", command]).await?;
            let generation = parse_generation(&values, "partition-generation")?;
            let value = values.get(command).map(String::as_str).unwrap_or_default();
            let map = parse_replicas(value, self, command == "replicas-all")?;
            Ok::<_, Error>((generation, map))
        }
        .await;

        match result {
            Ok((generation, map)) => {
                let previous = self.partition_generation();
                if generation != previous {
                    info!(node = %self, previous, generation, "partition generation changed");
                    *self.pending_partitions.lock() = Some(map);
                    self.partition_generation.store(generation, Ordering::Release);
                    self.partition_changed.store(true, Ordering::Release);
                }
            }
            Err(e) => self.refresh_failed(&e),
        }
    }

    fn refresh_failed(&self, e: &Error) {
        self.failures.fetch_add(1, Ordering::AcqRel);
        metrics::counter!("cluster_node_refresh_failures_total").increment(1);
        warn!(node = %self, error = %e, "node refresh failed");
    }

    // ------------------------------------------------------------------------
    // Connection pool
    // ------------------------------------------------------------------------

    /// Checks out a connection, opening one when the pool has none idle.
    /// With a connection cap, waits up to `timeout` for a slot.
    pub async fn get_connection(&self, timeout: Duration) -> Result<Connection> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_active() {
                return Err(self.inactive());
            }
            if let Some(conn) = self.pool.poll() {
                return Ok(conn);
            }
            if self.pool.try_reserve() {
                return match self.connector.connect(&self.host).await {
                    Ok(conn) => Ok(conn),
                    Err(e) => {
                        self.pool.release();
                        Err(e)
                    }
                };
            }
            if Instant::now() >= deadline {
                return Err(Error::PoolEmpty);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Returns a checked-out connection. Broken connections, and any
    /// connection of an inactive node, are closed instead.
    pub fn put_connection(&self, mut conn: Connection) {
        if !self.is_active() || !conn.is_connected() {
            self.pool.discard(conn);
            return;
        }
        conn.refresh();
        self.pool.offer(conn);
        if !self.is_active() {
            self.pool.close_all();
        }
    }

    /// Closes a checked-out connection that must not be reused.
    pub fn invalidate_connection(&self, conn: Connection) {
        self.pool.discard(conn);
    }

    /// Connections owned by this node, pooled or checked out.
    pub fn connection_count(&self) -> usize {
        self.pool.total()
    }

    // ------------------------------------------------------------------------
    // Migrations
    // ------------------------------------------------------------------------

    /// Returns true while the node is sending or receiving partitions.
    pub async fn migration_in_progress(&self) -> Result<bool> {
        let values = self.request_info(&["statistics"]).await?;
        let stats = values
            .get("statistics")
            .map(|v| parse_name_values(v))
            .unwrap_or_default();

        let busy = |key: &str| stats.get(key).is_some_and(|v| v != "0");
        Ok(busy("migrate_progress_send") || busy("migrate_progress_recv"))
    }

    /// Polls until no migration is running, failing with `Timeout` once
    /// `timeout` elapses.
    pub async fn wait_until_migration_finished(&self, timeout: Duration) -> Result<()> {
        let poll = async {
            while self.migration_in_progress().await? {
                tokio::time::sleep(MIGRATION_POLL_INTERVAL).await;
            }
            Ok(())
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| Error::Timeout(format!("waiting for migrations on {self}")))?
    }

    /// Marks the node inactive and drops its connections.
    pub fn close(&self) {
        self.active.store(false, Ordering::Release);
        self.pool.close_all();
        self.pending_partitions.lock().take();
        if let Ok(mut conn) = self.tend_conn.try_lock() {
            conn.take();
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(name: &str, connector: Arc<Connector>) -> Arc<Self> {
        let port = 3000 + name.len() as u16;
        Self::new(
            ValidatedNode {
                name: name.to_string(),
                primary_host: Host::new("127.0.0.1", port),
                aliases: vec![Host::new("127.0.0.1", port)],
                features: NodeFeatures::all(),
                conn: None,
            },
            connector,
        )
    }

    #[cfg(test)]
    pub(crate) fn set_failures(&self, failures: u32) {
        self.failures.store(failures, Ordering::Release);
    }
}

fn parse_generation(values: &HashMap<String, String>, key: &str) -> Result<i64> {
    let raw = values.get(key).map(String::as_str).unwrap_or_default();
    if raw.is_empty() {
        return Err(Error::Parse(format!("{key} is empty")));
    }
    raw.parse()
        .map_err(|_| Error::Parse(format!("{key} is not a number: {raw}")))
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.host)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("active", &self.is_active())
            .field("failures", &self.failures())
            .field("partition_generation", &self.partition_generation())
            .finish()
    }
}
