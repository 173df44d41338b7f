//! Cluster tending and replica-aware routing.
//!
//! This crate keeps a client's view of a partitioned cluster current:
//! - Discovers nodes from seeds and from the nodes' own peer lists
//! - Tracks which node owns every partition replica
//! - Drops nodes that failed or left, without blocking readers
//! - Picks the node to send a key operation to
//!
//! ```rust,no_run
//! use cluster::{ClientPolicy, Cluster};
//! use corelib::{Host, Key, ReplicaPolicy};
//!
//! # async fn run() -> corelib::Result<()> {
//! let cluster = Cluster::new(ClientPolicy::default(), &[Host::new("127.0.0.1", 3000)]).await?;
//! let key = Key::new("test", "users", "alice");
//! let node = cluster.read_node(&key.partition(), ReplicaPolicy::Master)?;
//! println!("alice lives on {node}");
//! cluster.close().await;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod connector;
pub mod node;
pub mod node_validator;
pub mod partition_parser;
pub mod peers;
pub mod policy;
pub mod pool;
pub mod removal;
pub mod resolver;

pub use cluster::Cluster;
pub use connector::Connector;
pub use node::Node;
pub use node_validator::{NodeValidator, ValidatedNode};
pub use peers::{Peer, Peers};
pub use policy::{ClientPolicy, RemovalPolicy};
