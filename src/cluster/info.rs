//! One-shot info requests.
//!
//! Info values are the cluster's text-based introspection surface:
//! node names, partition generations, peer lists and ownership bitmaps
//! all come back this way. Each call opens a fresh connection, performs
//! one request/response exchange, and returns the owned `(name, value)`
//! pairs.

use crate::codec::info as codec;
use crate::codec::proto::PROTO_TYPE_INFO;
use crate::error::{Error, NetworkError, Result};
use crate::net::{Connector, TcpConnector};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Query info values from a single host by name, outside any cluster.
///
/// Useful for probing a server before deciding to join it. Within a
/// running cluster the tender uses the cluster's own connector instead.
pub async fn request(
    host: &str,
    port: u16,
    names: &[&str],
    timeout: Duration,
) -> Result<Vec<(String, String)>> {
    let connector: Arc<dyn Connector> = Arc::new(TcpConnector::default());
    let addrs = connector.resolve(host, port).await?;
    let addr = addrs.first().copied().ok_or_else(|| {
        Error::Network(NetworkError::InvalidAddress(format!(
            "{host}:{port} resolved to no addresses"
        )))
    })?;
    request_with(&connector, addr, names, timeout).await
}

/// Query info values from `addr` over a fresh connection from `connector`.
pub(crate) async fn request_with(
    connector: &Arc<dyn Connector>,
    addr: SocketAddr,
    names: &[&str],
    timeout: Duration,
) -> Result<Vec<(String, String)>> {
    tokio::time::timeout(timeout, exchange(connector, addr, names))
        .await
        .map_err(|_| Error::Timeout)?
}

async fn exchange(
    connector: &Arc<dyn Connector>,
    addr: SocketAddr,
    names: &[&str],
) -> Result<Vec<(String, String)>> {
    let mut conn = connector.connect(addr).await?;

    let mut frame = BytesMut::new();
    codec::request(&mut frame, names);
    conn.send(&frame).await?;

    let (header, body) = conn.recv().await?;
    if header.msg_type != PROTO_TYPE_INFO {
        return Err(Error::Malformed(format!(
            "expected info response, got message type {}",
            header.msg_type
        )));
    }
    codec::parse_response(&body)
}
