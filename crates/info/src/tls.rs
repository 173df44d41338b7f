//! Plain and TLS transports.
//!
//! Provides a `MaybeTlsStream` wrapper that implements `AsyncRead` and
//! `AsyncWrite`, so connections work with either plain TCP or TLS without
//! caring which one they got.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use corelib::{Error, Host, Result};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::warn;

/// TLS settings for node connections.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsPolicy {
    /// CA certificate (PEM) used to verify servers. When `None`, the
    /// platform trust store is used.
    pub ca_cert: Option<PathBuf>,

    /// Accept any server certificate. Development only.
    pub insecure_skip_verify: bool,
}

impl TlsPolicy {
    /// Builds the connector shared by every connection of a cluster.
    pub fn build_connector(&self) -> Result<TlsConnector> {
        let config = if self.insecure_skip_verify {
            warn!("TLS certificate verification is disabled");
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        } else {
            rustls::ClientConfig::builder()
                .with_root_certificates(self.load_root_certs()?)
                .with_no_client_auth()
        };
        Ok(TlsConnector::from(Arc::new(config)))
    }

    fn load_root_certs(&self) -> Result<rustls::RootCertStore> {
        let mut roots = rustls::RootCertStore::empty();

        if let Some(path) = &self.ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                Error::Tls(format!("failed to read CA cert '{}': {e}", path.display()))
            })?;
            let certs = CertificateDer::pem_slice_iter(&pem)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Tls(e.to_string()))?;
            if certs.is_empty() {
                return Err(Error::Tls(format!(
                    "no certificates found in '{}'",
                    path.display()
                )));
            }
            for cert in certs {
                roots
                    .add(cert)
                    .map_err(|e| Error::Tls(format!("invalid CA certificate: {e}")))?;
            }
        } else {
            let native = rustls_native_certs::load_native_certs();
            for cert in native.certs {
                roots
                    .add(cert)
                    .map_err(|e| Error::Tls(format!("invalid native CA certificate: {e}")))?;
            }
        }

        Ok(roots)
    }
}

/// A TCP stream that may or may not be wrapped in TLS.
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Dials `host`, upgrading to TLS when a connector is given. The server
/// certificate is checked against the host's TLS name.
pub async fn connect(host: &Host, tls: Option<&TlsConnector>) -> io::Result<MaybeTlsStream> {
    let tcp = TcpStream::connect((host.name.as_str(), host.port)).await?;
    tcp.set_nodelay(true)?;

    let Some(connector) = tls else {
        return Ok(MaybeTlsStream::Plain(tcp));
    };

    let tls_name = host.tls_name_or_name().to_string();
    let server_name = ServerName::try_from(tls_name.clone()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid TLS name '{tls_name}': {e}"),
        )
    })?;

    let stream = connector.connect(server_name, tcp).await?;
    Ok(MaybeTlsStream::Tls(Box::new(stream)))
}

/// A certificate verifier that accepts everything.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ca_file() {
        let policy = TlsPolicy {
            ca_cert: Some(PathBuf::from("/nonexistent/ca.pem")),
            insecure_skip_verify: false,
        };
        assert!(matches!(policy.build_connector(), Err(Error::Tls(_))));
    }

    #[test]
    fn test_insecure_connector_builds() {
        let policy = TlsPolicy {
            ca_cert: None,
            insecure_skip_verify: true,
        };
        assert!(policy.build_connector().is_ok());
    }
}
