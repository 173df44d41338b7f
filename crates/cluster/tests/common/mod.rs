//! In-process fake server nodes for cluster tests.
//!
//! Each `FakeNode` listens on a loopback port and answers info requests from
//! a shared, mutable `FakeState`, so tests can change a node's view of the
//! cluster between tend cycles.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cluster::{ClientPolicy, Cluster};
use corelib::{Host, PARTITIONS};
use info::{MessageHeader, MessageType, HEADER_SIZE};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const NAMESPACE: &str = "test";

/// What a fake node reports.
#[derive(Debug, Clone)]
pub struct FakeState {
    pub name: String,
    pub features: String,
    pub cluster_name: String,
    pub partition_generation: i64,
    pub peers_generation: i64,
    pub peers: Vec<(String, Host)>,
    pub services: Vec<Host>,
    pub masters: Vec<usize>,
    pub proles: Vec<usize>,
    pub migrate_send: u64,
    pub migrate_recv: u64,
    pub down: bool,
    /// Pause before every reply.
    pub delay: Duration,
}

pub struct FakeNode {
    pub host: Host,
    state: Arc<Mutex<FakeState>>,
    open: Arc<AtomicUsize>,
}

impl FakeNode {
    pub async fn start(name: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = Host::new("127.0.0.1", listener.local_addr().unwrap().port());
        let state = Arc::new(Mutex::new(FakeState {
            name: name.to_string(),
            features: "peers;replicas-all;float;batch-index;geo".to_string(),
            cluster_name: "test-cluster".to_string(),
            partition_generation: 1,
            peers_generation: 1,
            peers: Vec::new(),
            services: Vec::new(),
            masters: Vec::new(),
            proles: Vec::new(),
            migrate_send: 0,
            migrate_recv: 0,
            down: false,
            delay: Duration::ZERO,
        }));
        let open = Arc::new(AtomicUsize::new(0));

        let shared = Arc::clone(&state);
        let counter = Arc::clone(&open);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                if shared.lock().down {
                    drop(socket);
                    continue;
                }
                let shared = Arc::clone(&shared);
                let counter = Arc::clone(&counter);
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    serve(socket, shared).await;
                    counter.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self { host, state, open }
    }

    /// Client connections currently held open against this node.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Waits up to two seconds for every client connection to go away.
    pub async fn wait_for_no_connections(&self) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.open_connections() > 0 {
            assert!(
                Instant::now() < deadline,
                "{} connection(s) still open to {}",
                self.open_connections(),
                self.name()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// This node as another node's peer entry.
    pub fn peer_entry(&self) -> (String, Host) {
        (self.name(), self.host.clone())
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock());
    }
}

/// Makes every node list every other node as a peer.
pub fn mesh(nodes: &[&FakeNode]) {
    for node in nodes {
        let others: Vec<_> = nodes
            .iter()
            .filter(|n| n.host != node.host)
            .map(|n| n.peer_entry())
            .collect();
        node.update(|s| s.peers = others);
    }
}

/// Splits the partitions round-robin: node `i` masters `pid % n == i` and
/// holds the prole of `pid % n == (i + 1) % n`.
pub fn split_partitions(nodes: &[&FakeNode]) {
    let n = nodes.len();
    for (i, node) in nodes.iter().enumerate() {
        let masters = (0..PARTITIONS).filter(|p| p % n == i).collect();
        let proles = (0..PARTITIONS).filter(|p| p % n == (i + 1) % n).collect();
        node.update(|s| {
            s.masters = masters;
            s.proles = proles;
        });
    }
}

/// A policy with short timeouts and no background tending, so tests drive
/// every cycle themselves.
pub fn test_policy() -> ClientPolicy {
    ClientPolicy {
        timeout: Duration::from_secs(2),
        tend_interval: Duration::from_secs(3600),
        cluster_name: Some("test-cluster".to_string()),
        ..ClientPolicy::default()
    }
}

/// Polls until the cluster lists exactly `names` (sorted), for up to two
/// seconds.
pub async fn wait_for_nodes(cluster: &Cluster, names: &[&str]) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let mut current = cluster.node_names();
        current.sort();
        if current == names {
            return;
        }
        assert!(Instant::now() < deadline, "nodes {current:?}, expected {names:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A listener that accepts connections and never answers.
pub async fn black_hole() -> Host {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = Host::new("127.0.0.1", listener.local_addr().unwrap().port());
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    host
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<FakeState>>) {
    loop {
        let mut header = [0u8; HEADER_SIZE];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let Ok(header) = MessageHeader::decode(&header) else {
            return;
        };
        let mut body = vec![0u8; header.body_len];
        if socket.read_exact(&mut body).await.is_err() {
            return;
        }

        let delay = state.lock().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = {
            let state = state.lock();
            if state.down {
                return;
            }
            String::from_utf8_lossy(&body)
                .split_terminator('\n')
                .map(|name| format!("{name}\t{}\n", answer(&state, name)))
                .collect::<String>()
        };

        let header = MessageHeader::new(MessageType::Info, reply.len()).encode();
        if socket.write_all(&header).await.is_err() || socket.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn answer(state: &FakeState, name: &str) -> String {
    match name {
        "node" => state.name.clone(),
        "features" => state.features.clone(),
        "cluster-name" => state.cluster_name.clone(),
        "partition-generation" => state.partition_generation.to_string(),
        "peers-generation" => state.peers_generation.to_string(),
        "peers-clear-std" | "peers-clear-alt" => {
            let entries: Vec<String> = state
                .peers
                .iter()
                .map(|(name, host)| format!("[{name},,[{}:{}]]", host.name, host.port))
                .collect();
            format!("{},3000,[{}]", state.peers_generation, entries.join(","))
        }
        "services" | "services-alternate" => state
            .services
            .iter()
            .map(|h| format!("{}:{}", h.name, h.port))
            .collect::<Vec<_>>()
            .join(";"),
        "replicas-master" => format!("{NAMESPACE}:{}", bitmap(&state.masters)),
        "replicas-all" => format!(
            "{NAMESPACE}:2,{},{}",
            bitmap(&state.masters),
            bitmap(&state.proles)
        ),
        "statistics" => format!(
            "cluster_size=3;migrate_progress_send={};migrate_progress_recv={};uptime=100",
            state.migrate_send, state.migrate_recv
        ),
        _ => String::new(),
    }
}

fn bitmap(owned: &[usize]) -> String {
    let mut bytes = vec![0u8; PARTITIONS / 8];
    for &id in owned {
        bytes[id >> 3] |= 0x80 >> (id & 7);
    }
    STANDARD.encode(bytes)
}
