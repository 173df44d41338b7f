//! A single framed connection to a server node.
//!
//! Every read and write is bounded by the connection timeout. Any I/O
//! failure marks the connection broken; broken connections are never handed
//! back to a pool.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use corelib::{Error, Host, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tracing::trace;

use crate::codec::{encode_info_request, parse_info_response};
use crate::protocol::{MessageHeader, MessageType, HEADER_SIZE};
use crate::tls::{self, MaybeTlsStream};

/// A connection to one node.
pub struct Connection {
    stream: MaybeTlsStream,
    addr: String,
    timeout: Duration,
    idle_timeout: Option<Duration>,
    idle_deadline: Option<Instant>,
    broken: bool,
}

impl Connection {
    /// Opens a connection to `host`, bounded by `timeout`.
    pub async fn connect(host: &Host, timeout: Duration, tls: Option<&TlsConnector>) -> Result<Self> {
        let addr = host.to_string();
        let stream = match tokio::time::timeout(timeout, tls::connect(host, tls)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::connection(&addr, e)),
            Err(_) => return Err(Error::Timeout(format!("connecting to {addr}"))),
        };
        trace!(addr = %addr, "connected");

        Ok(Self {
            stream,
            addr,
            timeout,
            idle_timeout: None,
            idle_deadline: None,
            broken: false,
        })
    }

    /// Address this connection was dialed to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sets the per-operation timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sets how long the connection may sit unused in a pool.
    pub fn set_idle_timeout(&mut self, idle_timeout: Option<Duration>) {
        self.idle_timeout = idle_timeout.filter(|d| !d.is_zero());
        self.refresh();
    }

    /// Restarts the idle clock.
    pub fn refresh(&mut self) {
        self.idle_deadline = self.idle_timeout.map(|d| Instant::now() + d);
    }

    /// Returns true once the idle deadline has passed.
    pub fn is_idle(&self) -> bool {
        self.idle_deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Returns false once an I/O error has been seen or the connection was closed.
    pub fn is_connected(&self) -> bool {
        !self.broken
    }

    /// Sends an info request and parses the response.
    pub async fn request_info(&mut self, names: &[&str]) -> Result<HashMap<String, String>> {
        let request = encode_info_request(names);
        self.write_all(&request).await?;

        let (header, body) = self.read_message().await?;
        if header.message_type != MessageType::Info {
            self.broken = true;
            return Err(Error::Parse(format!(
                "expected info response from {}, got message type {}",
                self.addr,
                header.message_type.as_u8()
            )));
        }
        self.refresh();
        parse_info_response(&body)
    }

    /// Writes one framed message.
    pub async fn write_message(&mut self, message_type: MessageType, body: &[u8]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
        buf.extend_from_slice(&MessageHeader::new(message_type, body.len()).encode());
        buf.extend_from_slice(body);
        self.write_all(&buf).await
    }

    /// Reads one framed message.
    pub async fn read_message(&mut self) -> Result<(MessageHeader, Bytes)> {
        let mut header = [0u8; HEADER_SIZE];
        self.read_exact(&mut header).await?;
        let header = match MessageHeader::decode(&header) {
            Ok(h) => h,
            Err(e) => {
                self.broken = true;
                return Err(e);
            }
        };

        let mut body = vec![0u8; header.body_len];
        self.read_exact(&mut body).await?;
        Ok((header, Bytes::from(body)))
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.broken {
            return Err(Error::connection(&self.addr, "connection is closed"));
        }
        let write = async {
            self.stream.write_all(buf).await?;
            self.stream.flush().await
        };
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.broken = true;
                Err(Error::connection(&self.addr, e))
            }
            Err(_) => {
                self.broken = true;
                Err(Error::Timeout(format!("writing to {}", self.addr)))
            }
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.broken {
            return Err(Error::connection(&self.addr, "connection is closed"));
        }
        match tokio::time::timeout(self.timeout, self.stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                self.broken = true;
                Err(Error::connection(&self.addr, e))
            }
            Err(_) => {
                self.broken = true;
                Err(Error::Timeout(format!("reading from {}", self.addr)))
            }
        }
    }

    /// Shuts the connection down. Errors are ignored.
    pub async fn close(mut self) {
        self.broken = true;
        let _ = tokio::time::timeout(self.timeout, self.stream.shutdown()).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("broken", &self.broken)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, Host) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Host::new("127.0.0.1", port))
    }

    #[tokio::test]
    async fn test_request_info() {
        let (listener, host) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut header = [0u8; HEADER_SIZE];
            socket.read_exact(&mut header).await.unwrap();
            let header = MessageHeader::decode(&header).unwrap();
            let mut body = vec![0u8; header.body_len];
            socket.read_exact(&mut body).await.unwrap();
            assert_eq!(body, b"node\n");

            let reply = b"node\tBB9020011AC4202\n";
            socket
                .write_all(&MessageHeader::new(MessageType::Info, reply.len()).encode())
                .await
                .unwrap();
            socket.write_all(reply).await.unwrap();
        });

        let mut conn = Connection::connect(&host, Duration::from_secs(1), None).await.unwrap();
        let values = conn.request_info(&["node"]).await.unwrap();
        assert_eq!(values["node"], "BB9020011AC4202");
        assert!(conn.is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_timeout_marks_broken() {
        let (listener, host) = listener().await;
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut conn = Connection::connect(&host, Duration::from_millis(50), None).await.unwrap();
        let err = conn.request_info(&["node"]).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, host) = listener().await;
        drop(listener);
        let err = Connection::connect(&host, Duration::from_secs(1), None).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_idle_deadline() {
        let (listener, host) = listener().await;
        let _server = tokio::spawn(async move {
            let _ = listener.accept().await;
        });
        let mut conn = Connection::connect(&host, Duration::from_secs(1), None).await.unwrap();
        assert!(!conn.is_idle());
        conn.set_idle_timeout(Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(conn.is_idle());
        conn.refresh();
        assert!(!conn.is_idle());
    }
}
