//! Scripted stand-in for the network.
//!
//! A [`MockConnector`] hands out connections whose behavior is fully
//! declared up front: each address carries a queue of [`ConnScript`]s,
//! one per accepted connection, and each script is a sequence of
//! [`Step`]s consumed by successive exchanges on that connection. The
//! scripts double as assertions: an exhausted script fails the next
//! receive the way a closed socket would.

use crate::codec::proto::{MsgHeader, ProtoHeader, PROTO_TYPE_INFO, PROTO_TYPE_MESSAGE};
use crate::codec::value as value_codec;
use crate::error::{NetworkError, ResultCode};
use crate::net::{Connection, Connector};
use crate::types::Value;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted behavior of one connection.
#[derive(Debug, Clone)]
pub enum Step {
    /// Answer the next receive with this complete frame.
    Reply(Vec<u8>),
    /// Answer the next receive with this frame after a delay.
    ReplyAfter(Duration, Vec<u8>),
    /// Fail the next receive.
    RecvError,
    /// Fail the next send.
    SendError,
    /// Never answer the next receive.
    Hang,
}

/// Scripted behavior for one accepted connection.
#[derive(Debug, Clone, Default)]
pub struct ConnScript {
    steps: VecDeque<Step>,
}

impl ConnScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, frame: Vec<u8>) -> Self {
        self.steps.push_back(Step::Reply(frame));
        self
    }

    pub fn reply_after(mut self, delay: Duration, frame: Vec<u8>) -> Self {
        self.steps.push_back(Step::ReplyAfter(delay, frame));
        self
    }

    pub fn recv_error(mut self) -> Self {
        self.steps.push_back(Step::RecvError);
        self
    }

    pub fn send_error(mut self) -> Self {
        self.steps.push_back(Step::SendError);
        self
    }

    pub fn hang(mut self) -> Self {
        self.steps.push_back(Step::Hang);
        self
    }
}

/// Connector whose every connection follows a pre-queued script.
#[derive(Default)]
pub struct MockConnector {
    scripts: Mutex<HashMap<SocketAddr, VecDeque<ConnScript>>>,
    hosts: Mutex<HashMap<(String, u16), Vec<SocketAddr>>>,
    sent: Arc<Mutex<Vec<(SocketAddr, Vec<u8>)>>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a script for the next accepted connection to `addr`.
    pub fn script(&self, addr: SocketAddr, script: ConnScript) {
        self.scripts.lock().entry(addr).or_default().push_back(script);
    }

    /// Map a host name to addresses for `resolve`. IP literals resolve
    /// without a mapping.
    pub fn map_host(&self, host: &str, port: u16, addr: SocketAddr) {
        self.hosts
            .lock()
            .entry((host.to_string(), port))
            .or_default()
            .push(addr);
    }

    /// Map a host name to an empty address list, as a resolver may
    /// legitimately return for a stale DNS entry.
    pub fn map_host_unroutable(&self, host: &str, port: u16) {
        self.hosts.lock().insert((host.to_string(), port), Vec::new());
    }

    /// Total connections handed out.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// Frames sent so far to `addr`, in order.
    pub fn sent_to(&self, addr: SocketAddr) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, f)| f.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, NetworkError> {
        if let Some(addrs) = self.hosts.lock().get(&(host.to_string(), port)) {
            return Ok(addrs.clone());
        }
        host.parse::<std::net::IpAddr>()
            .map(|ip| vec![SocketAddr::new(ip, port)])
            .map_err(|_| NetworkError::InvalidAddress(format!("{}:{} has no mapping", host, port)))
    }

    async fn connect(&self, addr: SocketAddr) -> Result<Box<dyn Connection>, NetworkError> {
        let script = self
            .scripts
            .lock()
            .get_mut(&addr)
            .and_then(|queue| queue.pop_front())
            .ok_or_else(|| NetworkError::ConnectionFailed {
                addr: addr.to_string(),
                reason: "no script queued".into(),
            })?;
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockConn {
            addr,
            steps: script.steps,
            sent: self.sent.clone(),
        }))
    }
}

struct MockConn {
    addr: SocketAddr,
    steps: VecDeque<Step>,
    sent: Arc<Mutex<Vec<(SocketAddr, Vec<u8>)>>>,
}

#[async_trait]
impl Connection for MockConn {
    async fn send(&mut self, frame: &[u8]) -> Result<(), NetworkError> {
        if matches!(self.steps.front(), Some(Step::SendError)) {
            self.steps.pop_front();
            return Err(NetworkError::SendFailed("scripted send failure".into()));
        }
        self.sent.lock().push((self.addr, frame.to_vec()));
        Ok(())
    }

    async fn recv(&mut self) -> Result<(ProtoHeader, BytesMut), NetworkError> {
        match self.steps.pop_front() {
            Some(Step::Reply(frame)) => split_frame(&frame),
            Some(Step::ReplyAfter(delay, frame)) => {
                tokio::time::sleep(delay).await;
                split_frame(&frame)
            }
            Some(Step::RecvError) => {
                Err(NetworkError::ReceiveFailed("scripted receive failure".into()))
            }
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::SendError) | None => Err(NetworkError::ConnectionClosed),
        }
    }
}

fn split_frame(frame: &[u8]) -> Result<(ProtoHeader, BytesMut), NetworkError> {
    let mut buf = BytesMut::from(frame);
    let header = ProtoHeader::read(&mut buf)
        .map_err(|e| NetworkError::ReceiveFailed(format!("bad scripted frame: {}", e)))?;
    Ok((header, buf))
}

/// Build a complete message-protocol response frame.
pub fn message_frame(code: ResultCode, generation: u32, bins: &[(&str, Value)]) -> Vec<u8> {
    let mut body = BytesMut::new();
    let header = MsgHeader {
        result_code: code.as_u8(),
        generation,
        n_ops: bins.len() as u16,
        ..Default::default()
    };
    header.write(&mut body);
    for (name, value) in bins {
        let payload = value_codec::payload_len(value);
        body.put_u32((4 + name.len() + payload) as u32);
        body.put_u8(1); // op: read
        body.put_u8(value.particle_type());
        body.put_u8(0);
        body.put_u8(name.len() as u8);
        body.put_slice(name.as_bytes());
        value_codec::write_payload(value, &mut body);
    }
    frame_with_header(PROTO_TYPE_MESSAGE, &body)
}

/// Build a complete info-protocol response frame.
pub fn info_frame(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut body = BytesMut::new();
    for (name, value) in pairs {
        body.put_slice(name.as_bytes());
        body.put_u8(b'\t');
        body.put_slice(value.as_bytes());
        body.put_u8(b'\n');
    }
    frame_with_header(PROTO_TYPE_INFO, &body)
}

fn frame_with_header(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8 + body.len());
    ProtoHeader::new(msg_type, body.len() as u64).write(&mut buf);
    buf.put_slice(body);
    buf.to_vec()
}

/// Base64 ownership bitmap claiming the listed partitions.
pub fn ownership_bitmap(n_partitions: usize, owned: impl IntoIterator<Item = usize>) -> String {
    let mut bytes = vec![0u8; n_partitions.div_ceil(8)];
    for pid in owned {
        bytes[pid >> 3] |= 0x80 >> (pid & 7);
    }
    BASE64.encode(&bytes)
}
