//! Message framing shared by info and authentication requests.
//!
//! Every message starts with an 8-byte header:
//!
//! ```text
//! +---------+------+-----------------------------+
//! | version | type |  body length (48-bit, BE)   |
//! |  1 byte |1 byte|          6 bytes            |
//! +---------+------+-----------------------------+
//! ```

use corelib::{Error, Result};

/// Protocol version written in every header.
pub const PROTO_VERSION: u8 = 2;

/// Size of the message header.
pub const HEADER_SIZE: usize = 8;

/// Largest body the client accepts. Partition bitmaps for many namespaces
/// stay far below this.
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Kind of message carried after the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Text info request/response.
    Info,
    /// Authentication handshake.
    Authenticate,
    /// Anything else; left to the excluded command layer.
    Other(u8),
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::Info => 1,
            MessageType::Authenticate => 2,
            MessageType::Other(v) => v,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => MessageType::Info,
            2 => MessageType::Authenticate,
            other => MessageType::Other(other),
        }
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u8,
    pub message_type: MessageType,
    pub body_len: usize,
}

impl MessageHeader {
    /// Header for a body of `body_len` bytes.
    pub fn new(message_type: MessageType, body_len: usize) -> Self {
        Self {
            version: PROTO_VERSION,
            message_type,
            body_len,
        }
    }

    /// Serializes the header.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let len = (self.body_len as u64).to_be_bytes();
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.version;
        out[1] = self.message_type.as_u8();
        out[2..].copy_from_slice(&len[2..]);
        out
    }

    /// Parses and validates a header.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        if buf[0] != PROTO_VERSION {
            return Err(Error::Parse(format!(
                "unsupported protocol version {} (expected {PROTO_VERSION})",
                buf[0]
            )));
        }
        let mut len = [0u8; 8];
        len[2..].copy_from_slice(&buf[2..]);
        let body_len = u64::from_be_bytes(len) as usize;
        if body_len > MAX_BODY_SIZE {
            return Err(Error::Parse(format!("message body of {body_len} bytes is too large")));
        }
        Ok(Self {
            version: buf[0],
            message_type: MessageType::from_u8(buf[1]),
            body_len,
        })
    }
}
