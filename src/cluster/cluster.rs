//! The cluster handle: membership state, request routing and the
//! public key-value operations.

use crate::cluster::node::NodeRef;
use crate::cluster::partition::PartitionMap;
use crate::cluster::tend;
use crate::codec::request::{self, KeyRef};
use crate::config::ClusterConfig;
use crate::digest::KeyDigest;
use crate::error::{Error, Result};
use crate::net::{Connector, TcpConnector};
use crate::sync::Guarded;
use crate::transaction::{self, TxnPlan};
use crate::types::{Bin, Host, Operation, Record, Value, WriteParams};
use bytes::BytesMut;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Point-in-time counters for the whole cluster handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterStats {
    pub requests_started: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub requests_timed_out: u64,
    pub retries: u64,
    pub requests_in_progress: usize,
    pub nodes: usize,
}

/// Live counters behind [`ClusterStats`]. Every transaction increments
/// `started` exactly once and exactly one of `completed`, `failed` or
/// `timed_out` exactly once.
#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) started: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) timed_out: AtomicU64,
    pub(crate) retries: AtomicU64,
    pub(crate) in_progress: AtomicUsize,
}

impl Counters {
    fn snapshot(&self, nodes: usize) -> ClusterStats {
        ClusterStats {
            requests_started: self.started.load(Ordering::Relaxed),
            requests_completed: self.completed.load(Ordering::Relaxed),
            requests_failed: self.failed.load(Ordering::Relaxed),
            requests_timed_out: self.timed_out.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            requests_in_progress: self.in_progress.load(Ordering::Relaxed),
            nodes,
        }
    }
}

/// Mutable membership state, guarded by the injectable lock. Held only
/// for short copy-in/copy-out sections, never across I/O.
pub(crate) struct ClusterState {
    pub(crate) nodes: Vec<NodeRef>,
    pub(crate) partitions: PartitionMap,
    pub(crate) seeds: Vec<Host>,
    pub(crate) follow: bool,
    pub(crate) round_robin: usize,
}

/// Everything the background tender and in-flight transactions share
/// with the public handle.
pub(crate) struct ClusterShared {
    pub(crate) config: ClusterConfig,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) state: Guarded<ClusterState>,
    pub(crate) counters: Counters,
    pub(crate) closed: AtomicBool,
    pub(crate) drain_tx: watch::Sender<bool>,
    pub(crate) nudge_tx: mpsc::Sender<()>,
    tend_stop_tx: watch::Sender<bool>,
}

impl ClusterShared {
    /// Pick the node for a digest: the known partition owner when one is
    /// usable, otherwise round-robin over usable nodes. `avoid` steers a
    /// retry away from the node that just refused, unless it is the only
    /// choice left.
    pub(crate) fn select_node(
        &self,
        namespace: &str,
        digest: &KeyDigest,
        avoid: Option<&NodeRef>,
    ) -> Option<NodeRef> {
        let mut state = self.state.lock();
        let pid = digest.partition_id(state.partitions.n_partitions());

        if let Some(owner) = state.partitions.owner(namespace, pid) {
            if avoid.map_or(true, |a| !Arc::ptr_eq(a, &owner)) {
                return Some(owner);
            }
        }

        let n = state.nodes.len();
        if n == 0 {
            return None;
        }
        let start = state.round_robin;
        state.round_robin = state.round_robin.wrapping_add(1);

        let mut fallback = None;
        for i in 0..n {
            let node = &state.nodes[(start + i) % n];
            if !node.is_usable() {
                continue;
            }
            if avoid.map_or(false, |a| Arc::ptr_eq(a, node)) {
                fallback = Some(node.clone());
                continue;
            }
            return Some(node.clone());
        }
        fallback
    }

    /// Ask the tender to run a round soon. Ignored if one is already
    /// queued.
    pub(crate) fn nudge_tend(&self) {
        let _ = self.nudge_tx.try_send(());
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Handle to one server cluster.
///
/// Cheap to clone; all clones share membership, pools and counters.
/// Operations are plain async methods returning the server's response
/// record, already routed to the partition owner and retried per the
/// write policy.
#[derive(Clone)]
pub struct Cluster {
    shared: Arc<ClusterShared>,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes = self.shared.state.lock().nodes.len();
        f.debug_struct("Cluster")
            .field("nodes", &nodes)
            .field("closed", &self.shared.is_closed())
            .finish_non_exhaustive()
    }
}

impl Cluster {
    /// Connect to the cluster reachable through the configured seeds.
    ///
    /// Runs one synchronous tend round to learn the initial membership,
    /// then spawns the background tender. Returns a usable handle even
    /// if no seed answered yet; the tender keeps trying.
    pub async fn connect(config: ClusterConfig) -> Result<Cluster> {
        if config.seeds.is_empty() {
            return Err(Error::Config("at least one seed host is required".into()));
        }
        if !config.n_partitions.is_power_of_two() || config.n_partitions == 0 {
            return Err(Error::Config(format!(
                "partition count must be a power of two, got {}",
                config.n_partitions
            )));
        }

        let connector = config
            .connector
            .clone()
            .unwrap_or_else(|| Arc::new(TcpConnector::new(config.pool.connect_timeout)));

        let state = ClusterState {
            nodes: Vec::new(),
            partitions: PartitionMap::new(config.n_partitions),
            seeds: config.seeds.clone(),
            follow: config.follow,
            round_robin: 0,
        };

        let (drain_tx, _) = watch::channel(false);
        let (tend_stop_tx, tend_stop_rx) = watch::channel(false);
        let (nudge_tx, nudge_rx) = mpsc::channel(1);

        let shared = Arc::new(ClusterShared {
            state: Guarded::new(&config.lock_hooks, state),
            connector,
            counters: Counters::default(),
            closed: AtomicBool::new(false),
            drain_tx,
            nudge_tx,
            tend_stop_tx,
            config,
        });

        tend::tend_once(&shared).await;
        let joined = shared.state.lock().nodes.len();
        if joined == 0 {
            warn!("no seed node answered; continuing with background tending");
        } else {
            info!(nodes = joined, "cluster joined");
        }

        tokio::spawn(tend::run(shared.clone(), tend_stop_rx, nudge_rx));

        Ok(Cluster { shared })
    }

    /// Add another seed host to probe on subsequent tend rounds.
    pub fn add_host(&self, host: impl Into<String>, port: u16) {
        let host = Host::new(host, port);
        {
            let mut state = self.shared.state.lock();
            if state.seeds.contains(&host) {
                return;
            }
            state.seeds.push(host);
        }
        self.shared.nudge_tend();
    }

    /// Enable or disable following peers advertised by known nodes.
    pub fn set_follow(&self, follow: bool) {
        self.shared.state.lock().follow = follow;
    }

    /// Number of nodes currently considered usable.
    pub fn active_node_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .nodes
            .iter()
            .filter(|n| n.is_usable())
            .count()
    }

    /// Transactions currently in flight on this handle.
    pub fn requests_in_progress(&self) -> usize {
        self.shared.counters.in_progress.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ClusterStats {
        let nodes = self.shared.state.lock().nodes.len();
        self.shared.counters.snapshot(nodes)
    }

    /// Read selected bins of a record.
    pub async fn get(
        &self,
        namespace: &str,
        set: &str,
        key: &Value,
        bins: &[&str],
        timeout: Duration,
    ) -> Result<Record> {
        let digest = KeyDigest::compute(set, key);
        let mut frame = BytesMut::new();
        request::read(
            &mut frame,
            namespace,
            KeyRef::Key { set, key },
            Some(bins),
            timeout_ms(timeout),
        )?;
        self.execute_read(namespace, digest, frame, timeout).await
    }

    /// Read every bin of a record.
    pub async fn get_all(
        &self,
        namespace: &str,
        set: &str,
        key: &Value,
        timeout: Duration,
    ) -> Result<Record> {
        let digest = KeyDigest::compute(set, key);
        let mut frame = BytesMut::new();
        request::read(
            &mut frame,
            namespace,
            KeyRef::Key { set, key },
            None,
            timeout_ms(timeout),
        )?;
        self.execute_read(namespace, digest, frame, timeout).await
    }

    /// Read selected bins by precomputed digest.
    pub async fn get_digest(
        &self,
        namespace: &str,
        digest: &KeyDigest,
        bins: Option<&[&str]>,
        timeout: Duration,
    ) -> Result<Record> {
        let mut frame = BytesMut::new();
        request::read(
            &mut frame,
            namespace,
            KeyRef::Digest(digest),
            bins,
            timeout_ms(timeout),
        )?;
        self.execute_read(namespace, *digest, frame, timeout).await
    }

    /// Write bins to a record.
    pub async fn put(
        &self,
        namespace: &str,
        set: &str,
        key: &Value,
        bins: &[Bin],
        params: &WriteParams,
        timeout: Duration,
    ) -> Result<Record> {
        let digest = KeyDigest::compute(set, key);
        let mut frame = BytesMut::new();
        request::write(
            &mut frame,
            namespace,
            KeyRef::Key { set, key },
            bins,
            params,
            timeout_ms(timeout),
        )?;
        self.execute_write(namespace, digest, frame, params, timeout)
            .await
    }

    /// Write bins to a record addressed by precomputed digest.
    pub async fn put_digest(
        &self,
        namespace: &str,
        digest: &KeyDigest,
        bins: &[Bin],
        params: &WriteParams,
        timeout: Duration,
    ) -> Result<Record> {
        let mut frame = BytesMut::new();
        request::write(
            &mut frame,
            namespace,
            KeyRef::Digest(digest),
            bins,
            params,
            timeout_ms(timeout),
        )?;
        self.execute_write(namespace, *digest, frame, params, timeout)
            .await
    }

    /// Delete a record.
    pub async fn delete(
        &self,
        namespace: &str,
        set: &str,
        key: &Value,
        params: &WriteParams,
        timeout: Duration,
    ) -> Result<Record> {
        let digest = KeyDigest::compute(set, key);
        let mut frame = BytesMut::new();
        request::delete(
            &mut frame,
            namespace,
            KeyRef::Key { set, key },
            params,
            timeout_ms(timeout),
        )?;
        self.execute_write(namespace, digest, frame, params, timeout)
            .await
    }

    /// Delete a record addressed by precomputed digest.
    pub async fn delete_digest(
        &self,
        namespace: &str,
        digest: &KeyDigest,
        params: &WriteParams,
        timeout: Duration,
    ) -> Result<Record> {
        let mut frame = BytesMut::new();
        request::delete(
            &mut frame,
            namespace,
            KeyRef::Digest(digest),
            params,
            timeout_ms(timeout),
        )?;
        self.execute_write(namespace, *digest, frame, params, timeout)
            .await
    }

    /// Apply a mixed batch of read/write/add operations to one record.
    pub async fn operate(
        &self,
        namespace: &str,
        set: &str,
        key: &Value,
        ops: &[Operation],
        params: &WriteParams,
        timeout: Duration,
    ) -> Result<Record> {
        let digest = KeyDigest::compute(set, key);
        let mut frame = BytesMut::new();
        request::operate(
            &mut frame,
            namespace,
            KeyRef::Key { set, key },
            ops,
            params,
            timeout_ms(timeout),
        )?;
        self.execute_write(namespace, digest, frame, params, timeout)
            .await
    }

    /// Apply operations to a record addressed by precomputed digest.
    pub async fn operate_digest(
        &self,
        namespace: &str,
        digest: &KeyDigest,
        ops: &[Operation],
        params: &WriteParams,
        timeout: Duration,
    ) -> Result<Record> {
        let mut frame = BytesMut::new();
        request::operate(
            &mut frame,
            namespace,
            KeyRef::Digest(digest),
            ops,
            params,
            timeout_ms(timeout),
        )?;
        self.execute_write(namespace, *digest, frame, params, timeout)
            .await
    }

    async fn execute_read(
        &self,
        namespace: &str,
        digest: KeyDigest,
        frame: BytesMut,
        timeout: Duration,
    ) -> Result<Record> {
        let plan = TxnPlan::read(namespace, digest, frame, timeout, &self.shared.config.retry);
        transaction::execute(&self.shared, plan).await
    }

    async fn execute_write(
        &self,
        namespace: &str,
        digest: KeyDigest,
        frame: BytesMut,
        params: &WriteParams,
        timeout: Duration,
    ) -> Result<Record> {
        let plan = TxnPlan::write(
            namespace,
            digest,
            frame,
            params.policy,
            timeout,
            &self.shared.config.retry,
        );
        transaction::execute(&self.shared, plan).await
    }

    /// Shut the cluster down.
    ///
    /// Refuses new transactions immediately, waits up to `grace` for
    /// in-flight ones to drain, then fails any stragglers and closes
    /// every idle connection. Idempotent.
    pub async fn close(&self, grace: Duration) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shared.tend_stop_tx.send(true);

        let deadline = tokio::time::Instant::now() + grace;
        while self.shared.counters.in_progress.load(Ordering::Acquire) > 0 {
            if tokio::time::Instant::now() >= deadline {
                let stragglers = self.shared.counters.in_progress.load(Ordering::Acquire);
                warn!(stragglers, "close grace expired, aborting in-flight requests");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let _ = self.shared.drain_tx.send(true);

        let nodes: Vec<NodeRef> = self.shared.state.lock().nodes.clone();
        for node in &nodes {
            node.pool().close_idle();
        }
        info!("cluster closed");
    }
}

fn timeout_ms(timeout: Duration) -> u32 {
    timeout.as_millis().min(u32::MAX as u128) as u32
}
