//! Peer discovery state for one tend cycle.
//!
//! Nodes refresh concurrently and report what they learn into a shared
//! `Peers` value: the peers they list, the friend hosts of the legacy
//! services list, and the nodes created along the way. The tend cycle reads
//! it back once every node task has joined. A fresh `Peers` is built for
//! every cycle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use corelib::{Error, Host, Result, DEFAULT_PORT};
use parking_lot::Mutex;
use tracing::warn;

use crate::node::Node;

/// A node advertised by another node's peer list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub node_name: String,
    pub tls_name: Option<String>,
    pub hosts: Vec<Host>,
}

/// What the nodes reported during one tend cycle.
pub struct Peers {
    peers: Mutex<Vec<Peer>>,
    peer_names: Mutex<HashSet<String>>,
    hosts: Mutex<HashSet<Host>>,
    nodes: Mutex<HashMap<String, Arc<Node>>>,
    friends: Mutex<Vec<Host>>,
    refresh_count: AtomicUsize,
    gen_changed: AtomicBool,
    use_peers: AtomicBool,
    peers_refreshed: AtomicBool,
    aliases_changed: AtomicBool,
}

impl Peers {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
            peer_names: Mutex::new(HashSet::new()),
            hosts: Mutex::new(HashSet::new()),
            nodes: Mutex::new(HashMap::new()),
            friends: Mutex::new(Vec::new()),
            refresh_count: AtomicUsize::new(0),
            gen_changed: AtomicBool::new(false),
            use_peers: AtomicBool::new(true),
            peers_refreshed: AtomicBool::new(false),
            aliases_changed: AtomicBool::new(false),
        }
    }

    /// Adds peers reported by one node. Peers already reported by another
    /// node are skipped.
    pub fn append_peers(&self, list: Vec<Peer>) {
        let mut names = self.peer_names.lock();
        let mut peers = self.peers.lock();
        for peer in list {
            if names.insert(peer.node_name.clone()) {
                peers.push(peer);
            }
        }
    }

    /// Distinct peers reported so far.
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.lock().clone()
    }

    /// Records that `host` has been probed this cycle. Returns false if it
    /// already was.
    pub fn add_host(&self, host: Host) -> bool {
        self.hosts.lock().insert(host)
    }

    /// Returns true if `host` has been probed this cycle.
    pub fn host_exists(&self, host: &Host) -> bool {
        self.hosts.lock().contains(host)
    }

    /// Registers a node created this cycle. Returns false, leaving the
    /// existing entry, when a node of that name was already created.
    pub fn add_node(&self, node: Arc<Node>) -> bool {
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(node.name()) {
            return false;
        }
        nodes.insert(node.name().to_string(), node);
        true
    }

    /// Node created this cycle with the given name.
    pub fn node_by_name(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.lock().get(name).cloned()
    }

    /// Removes and returns the nodes created this cycle.
    pub fn take_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.lock().drain().map(|(_, node)| node).collect()
    }

    /// Adds a host listed by a node's services list.
    pub fn add_friend(&self, host: Host) {
        self.friends.lock().push(host);
    }

    /// Friend hosts reported this cycle, in report order.
    pub fn friends(&self) -> Vec<Host> {
        self.friends.lock().clone()
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_count.load(Ordering::Acquire)
    }

    pub fn increment_refresh_count(&self) {
        self.refresh_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn reset_refresh_count(&self) {
        self.refresh_count.store(0, Ordering::Release);
    }

    /// Returns true if some node reported a new peers generation.
    pub fn gen_changed(&self) -> bool {
        self.gen_changed.load(Ordering::Acquire)
    }

    pub fn mark_gen_changed(&self) {
        self.gen_changed.store(true, Ordering::Release);
    }

    /// Returns false once the cycle has fallen back to the services list.
    pub fn use_peers(&self) -> bool {
        self.use_peers.load(Ordering::Acquire)
    }

    pub fn disable_peers(&self) {
        self.use_peers.store(false, Ordering::Release);
    }

    /// Returns true if peer lists were re-fetched this cycle.
    pub fn peers_refreshed(&self) -> bool {
        self.peers_refreshed.load(Ordering::Acquire)
    }

    pub fn mark_peers_refreshed(&self) {
        self.peers_refreshed.store(true, Ordering::Release);
    }

    /// Returns true if an existing node gained an alias this cycle.
    pub fn aliases_changed(&self) -> bool {
        self.aliases_changed.load(Ordering::Acquire)
    }

    pub fn mark_aliases_changed(&self) {
        self.aliases_changed.store(true, Ordering::Release);
    }
}

impl Default for Peers {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a `peers-*` info value:
/// `generation,default_port,[[name,tls_name,[host[:port],...]],...]`.
///
/// Returns the peers generation and the advertised peers.
pub fn parse_peers(value: &str) -> Result<(i64, Vec<Peer>)> {
    let mut p = PeerParser::new(value.trim());

    let generation = p
        .field()
        .parse::<i64>()
        .map_err(|_| p.error("peers generation is not a number"))?;
    p.expect(b',')?;

    let default_port = match p.field() {
        "" => DEFAULT_PORT,
        port => port
            .parse::<u16>()
            .map_err(|_| p.error("default port is not a number"))?,
    };
    p.expect(b',')?;

    let mut peers = Vec::new();
    p.expect(b'[')?;
    if p.eat(b']') {
        return Ok((generation, peers));
    }

    loop {
        p.expect(b'[')?;
        let node_name = p.field().to_string();
        p.expect(b',')?;
        let tls_name = Some(p.field().to_string()).filter(|s| !s.is_empty());
        p.expect(b',')?;

        let mut hosts = Vec::new();
        p.expect(b'[')?;
        if !p.eat(b']') {
            loop {
                let mut host = Host::parse(p.host_token(), default_port)?;
                host.tls_name = tls_name.clone();
                hosts.push(host);
                if p.eat(b']') {
                    break;
                }
                p.expect(b',')?;
            }
        }
        p.expect(b']')?;

        if node_name.is_empty() {
            return Err(p.error("peer without a node name"));
        }
        peers.push(Peer {
            node_name,
            tls_name,
            hosts,
        });

        if p.eat(b']') {
            break;
        }
        p.expect(b',')?;
    }

    Ok((generation, peers))
}

struct PeerParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> PeerParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        if self.eat(b) {
            Ok(())
        } else {
            Err(self.error(&format!("expected `{}`", b as char)))
        }
    }

    /// Text up to the next `,` or `]`.
    fn field(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b',' || b == b']' || b == b'[' {
                break;
            }
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    /// One host entry; IPv6 literals keep their brackets.
    fn host_token(&mut self) -> &'a str {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'[' => depth += 1,
                b']' if depth == 0 => break,
                b']' => depth -= 1,
                b',' if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    fn error(&self, msg: &str) -> Error {
        Error::Parse(format!("{msg} at offset {} in peers `{}`", self.pos, self.input))
    }
}

/// Parses a `services` info value: `host:port;host:port`. Malformed
/// entries are skipped.
pub fn parse_services(value: &str) -> Vec<Host> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|entry| match Host::parse(entry, DEFAULT_PORT) {
            Ok(host) => Some(host),
            Err(e) => {
                warn!(entry, error = %e, "malformed services entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peers() {
        let (generation, peers) = parse_peers(
            "12,3000,[[BB9020011AC4202,,[10.0.0.2,10.0.0.3:3100]],[BB9030011AC4202,db3,[[2001:db8::1]:3200]]]",
        )
        .unwrap();
        assert_eq!(generation, 12);
        assert_eq!(peers.len(), 2);

        assert_eq!(peers[0].node_name, "BB9020011AC4202");
        assert_eq!(peers[0].tls_name, None);
        assert_eq!(
            peers[0].hosts,
            vec![Host::new("10.0.0.2", 3000), Host::new("10.0.0.3", 3100)]
        );

        assert_eq!(peers[1].tls_name.as_deref(), Some("db3"));
        assert_eq!(
            peers[1].hosts,
            vec![Host::with_tls_name("2001:db8::1", 3200, "db3")]
        );
    }

    #[test]
    fn test_parse_empty_peers() {
        let (generation, peers) = parse_peers("4,3000,[]").unwrap();
        assert_eq!(generation, 4);
        assert!(peers.is_empty());
    }

    #[test]
    fn test_parse_peer_without_hosts() {
        let (_, peers) = parse_peers("1,3000,[[A1,,[]]]").unwrap();
        assert_eq!(peers.len(), 1);
        assert!(peers[0].hosts.is_empty());
    }

    #[test]
    fn test_parse_peers_malformed() {
        assert!(parse_peers("x,3000,[]").is_err());
        assert!(parse_peers("1,3000,[[A1,,[10.0.0.1]]").is_err());
        assert!(parse_peers("1,3000").is_err());
    }

    #[test]
    fn test_parse_services() {
        let hosts = parse_services("10.0.0.1:3000;10.0.0.2:3001;;bad:port");
        assert_eq!(
            hosts,
            vec![Host::new("10.0.0.1", 3000), Host::new("10.0.0.2", 3001)]
        );
    }

    #[test]
    fn test_append_peers_dedupes() {
        let peers = Peers::new();
        let peer = Peer {
            node_name: "A".into(),
            tls_name: None,
            hosts: vec![Host::new("10.0.0.1", 3000)],
        };
        peers.append_peers(vec![peer.clone()]);
        peers.append_peers(vec![peer]);
        assert_eq!(peers.peers().len(), 1);
    }

    #[test]
    fn test_add_host_once() {
        let peers = Peers::new();
        assert!(peers.add_host(Host::new("10.0.0.1", 3000)));
        assert!(!peers.add_host(Host::new("10.0.0.1", 3000)));
        assert!(peers.host_exists(&Host::new("10.0.0.1", 3000)));
    }
}
