//! Network addresses of cluster nodes.
//!
//! A `Host` is an immutable value used both to dial a node and as the key of
//! the cluster's alias table, so equality and hashing cover every field.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default service port of a server node.
pub const DEFAULT_PORT: u16 = 3000;

/// A reachable network address with an optional TLS identity override.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Host {
    /// Hostname or IP literal.
    pub name: String,
    /// Service port.
    pub port: u16,
    /// Name expected in the server certificate, when it differs from `name`.
    #[serde(default)]
    pub tls_name: Option<String>,
}

impl Host {
    /// Creates a host without a TLS name.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            tls_name: None,
        }
    }

    /// Creates a host with an explicit TLS name.
    pub fn with_tls_name(name: impl Into<String>, port: u16, tls_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port,
            tls_name: Some(tls_name.into()),
        }
    }

    /// Returns the IP address if `name` is an IP literal.
    pub fn ip(&self) -> Option<IpAddr> {
        self.name.parse().ok()
    }

    /// Returns true if `name` is an IP literal rather than a hostname.
    pub fn is_ip(&self) -> bool {
        self.ip().is_some()
    }

    /// The name used to verify the server certificate.
    pub fn tls_name_or_name(&self) -> &str {
        self.tls_name.as_deref().unwrap_or(&self.name)
    }

    /// Parses one `host`, `host:port`, `[v6]` or `[v6]:port` entry.
    pub fn parse(input: &str, default_port: u16) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidHost("empty host".into()));
        }

        if let Some(rest) = input.strip_prefix('[') {
            let (addr, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::InvalidHost(format!("unterminated IPv6 literal `{input}`")))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p, input)?,
                None if tail.is_empty() => default_port,
                None => return Err(Error::InvalidHost(format!("unexpected `{tail}` in `{input}`"))),
            };
            return Ok(Host::new(addr, port));
        }

        // A bare IPv6 literal contains several colons and no port.
        if input.matches(':').count() > 1 {
            return Ok(Host::new(input, default_port));
        }

        match input.split_once(':') {
            Some((name, port)) if !name.is_empty() => Ok(Host::new(name, parse_port(port, input)?)),
            Some(_) => Err(Error::InvalidHost(format!("missing host name in `{input}`"))),
            None => Ok(Host::new(input, default_port)),
        }
    }

    /// Parses a comma separated host list such as `a:3000,b,[::1]:3100`.
    pub fn parse_list(input: &str, default_port: u16) -> Result<Vec<Self>> {
        input
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| Host::parse(s, default_port))
            .collect()
    }
}

fn parse_port(port: &str, input: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| Error::InvalidHost(format!("invalid port `{port}` in `{input}`")))
}

impl FromStr for Host {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Host::parse(s, DEFAULT_PORT)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.contains(':') {
            write!(f, "[{}]:{}", self.name, self.port)
        } else {
            write!(f, "{}:{}", self.name, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(Host::parse("db1", 3000).unwrap(), Host::new("db1", 3000));
        assert_eq!(Host::parse("db1:3100", 3000).unwrap(), Host::new("db1", 3100));
        assert_eq!(Host::parse("[::1]:3100", 3000).unwrap(), Host::new("::1", 3100));
        assert_eq!(Host::parse("[fe80::1]", 3000).unwrap(), Host::new("fe80::1", 3000));
        assert_eq!(Host::parse("fe80::1", 3000).unwrap(), Host::new("fe80::1", 3000));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Host::parse("", 3000).is_err());
        assert!(Host::parse(":3000", 3000).is_err());
        assert!(Host::parse("db1:http", 3000).is_err());
        assert!(Host::parse("[::1", 3000).is_err());
    }

    #[test]
    fn test_parse_list() {
        let hosts = Host::parse_list("a:1, b ,[::1]:2", 3000).unwrap();
        assert_eq!(
            hosts,
            vec![Host::new("a", 1), Host::new("b", 3000), Host::new("::1", 2)]
        );
    }

    #[test]
    fn test_display_brackets_ipv6() {
        assert_eq!(Host::new("10.0.0.1", 3000).to_string(), "10.0.0.1:3000");
        assert_eq!(Host::new("::1", 3000).to_string(), "[::1]:3000");
    }

    #[test]
    fn test_tls_name_fallback() {
        assert_eq!(Host::new("db1", 1).tls_name_or_name(), "db1");
        assert_eq!(Host::with_tls_name("10.0.0.1", 1, "db1.example").tls_name_or_name(), "db1.example");
        assert!(Host::new("10.0.0.1", 1).is_ip());
        assert!(!Host::new("db1", 1).is_ip());
    }
}
