//! Host to alias expansion.

use std::collections::HashSet;

use corelib::{Error, Host, Result};
use tracing::debug;

/// Expands `host` into the addresses to probe, in resolution order.
///
/// An IP literal is its own single alias. A hostname yields one alias per
/// distinct address, each remembering the hostname as its TLS name unless
/// the host already carried one.
pub async fn resolve(host: &Host) -> Result<Vec<Host>> {
    if host.is_ip() {
        return Ok(vec![host.clone()]);
    }

    let addrs = tokio::net::lookup_host((host.name.as_str(), host.port))
        .await
        .map_err(|e| Error::connection(host, format!("DNS lookup failed: {e}")))?;

    let tls_name = host.tls_name.clone().unwrap_or_else(|| host.name.clone());
    let mut seen = HashSet::new();
    let aliases: Vec<Host> = addrs
        .filter(|addr| seen.insert(addr.ip()))
        .map(|addr| Host::with_tls_name(addr.ip().to_string(), host.port, tls_name.clone()))
        .collect();

    if aliases.is_empty() {
        return Err(Error::connection(host, "hostname resolved to no addresses"));
    }

    debug!(host = %host, aliases = aliases.len(), "resolved host");
    Ok(aliases)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ip_literal_is_single_alias() {
        let host = Host::with_tls_name("10.1.2.3", 3000, "db.example");
        assert_eq!(resolve(&host).await.unwrap(), vec![host]);
    }

    #[tokio::test]
    async fn test_hostname_keeps_name_as_tls_name() {
        let host = Host::new("localhost", 3100);
        let aliases = resolve(&host).await.unwrap();
        assert!(!aliases.is_empty());
        for alias in &aliases {
            assert!(alias.is_ip());
            assert_eq!(alias.port, 3100);
            assert_eq!(alias.tls_name.as_deref(), Some("localhost"));
        }
    }
}
