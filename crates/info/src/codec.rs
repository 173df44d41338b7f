//! Info request/response bodies.
//!
//! A request body is the list of names, each terminated by `\n`. The
//! response echoes each name followed by a tab and its value, one per line;
//! a bare name means the value is empty.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use corelib::{Error, Result};

use crate::protocol::{MessageHeader, MessageType, HEADER_SIZE};

/// Encodes a full info request message (header + body).
pub fn encode_info_request(names: &[&str]) -> Bytes {
    let body_len: usize = names.iter().map(|n| n.len() + 1).sum();
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
    buf.put_slice(&MessageHeader::new(MessageType::Info, body_len).encode());
    for name in names {
        buf.put_slice(name.as_bytes());
        buf.put_u8(b'\n');
    }
    buf.freeze()
}

/// Parses an info response body into `name → value`.
pub fn parse_info_response(body: &[u8]) -> Result<HashMap<String, String>> {
    let text = std::str::from_utf8(body)
        .map_err(|e| Error::Parse(format!("info response is not valid UTF-8: {e}")))?;

    let mut values = HashMap::new();
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((name, value)) => values.insert(name.to_string(), value.to_string()),
            None => values.insert(line.to_string(), String::new()),
        };
    }
    Ok(values)
}

/// Splits `k1=v1;k2=v2` style values, as returned by `statistics`.
pub fn parse_name_values(value: &str) -> HashMap<String, String> {
    value
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}
