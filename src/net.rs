//! Network capability boundary.
//!
//! The engine consumes connectivity through the [`Connector`] and
//! [`Connection`] traits rather than touching sockets directly: production
//! code plugs in [`TcpConnector`] (tokio sockets and DNS), tests plug in a
//! scripted mock. One connection carries one transaction at a time;
//! requests are never pipelined.

use crate::codec::proto::ProtoHeader;
use crate::error::NetworkError;
use async_trait::async_trait;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A single reusable connection to one node.
#[async_trait]
pub trait Connection: Send {
    /// Write one complete request frame.
    async fn send(&mut self, frame: &[u8]) -> Result<(), NetworkError>;

    /// Read one complete response frame: the parsed proto header plus the
    /// body bytes (header already consumed).
    async fn recv(&mut self) -> Result<(ProtoHeader, BytesMut), NetworkError>;
}

/// Connection factory plus the DNS capability.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Resolve a host name and port to socket addresses.
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, NetworkError>;

    /// Open a new connection to `addr`.
    async fn connect(&self, addr: SocketAddr) -> Result<Box<dyn Connection>, NetworkError>;
}

/// Production connector over tokio TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, NetworkError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| NetworkError::InvalidAddress(format!("{}:{}: {}", host, port, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(NetworkError::InvalidAddress(format!(
                "{}:{} resolved to no addresses",
                host, port
            )));
        }
        Ok(addrs)
    }

    async fn connect(&self, addr: SocketAddr) -> Result<Box<dyn Connection>, NetworkError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::ConnectionFailed {
                addr: addr.to_string(),
                reason: "connect timeout".into(),
            })?
            .map_err(|e| NetworkError::ConnectionFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true).ok();
        Ok(Box::new(TcpConnection { stream }))
    }
}

struct TcpConnection {
    stream: TcpStream,
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&mut self, frame: &[u8]) -> Result<(), NetworkError> {
        self.stream
            .write_all(frame)
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Result<(ProtoHeader, BytesMut), NetworkError> {
        let mut header_bytes = [0u8; 8];
        self.stream
            .read_exact(&mut header_bytes)
            .await
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        let header = ProtoHeader::read(&mut &header_bytes[..])
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        let mut body = BytesMut::zeroed(header.size as usize);
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        Ok((header, body))
    }
}
