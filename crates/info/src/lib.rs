//! Info protocol and node connections.
//!
//! This crate provides what the tend engine needs to talk to a node:
//! - Message framing and the text info request/response codec
//! - Plain or TLS transports
//! - A timeout-bounded `Connection`
//! - The `Authenticator` hook for new connections

pub mod auth;
pub mod codec;
pub mod connection;
pub mod protocol;
pub mod tls;

pub use auth::Authenticator;
pub use codec::{encode_info_request, parse_info_response, parse_name_values};
pub use connection::Connection;
pub use protocol::{MessageHeader, MessageType, HEADER_SIZE, PROTO_VERSION};
pub use tls::{MaybeTlsStream, TlsPolicy};
pub use tokio_rustls::TlsConnector;
