//! Command line inspection of a tended cluster.
//!
//! `clusterctl` connects through the same tend engine an application uses,
//! waits for the node list to settle, runs one command and closes the
//! cluster again.

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
