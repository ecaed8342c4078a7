//! Single-record transaction execution.
//!
//! One transaction is one request frame pushed through the cluster:
//! route to the partition owner, acquire a pooled connection, exchange
//! one frame, classify the result. Transient failures are retried
//! within the policy's budget; the caller's deadline preempts
//! everything. Each call settles exactly once.

use crate::cluster::node::NodeRef;
use crate::cluster::ClusterShared;
use crate::codec::proto::PROTO_TYPE_MESSAGE;
use crate::codec::response;
use crate::config::RetryConfig;
use crate::digest::KeyDigest;
use crate::error::{Error, Result, ResultCode};
use crate::pool::{Acquired, ConnOutcome};
use crate::types::{Record, WritePolicy};
use bytes::BytesMut;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Pause before probing another node after a pool reported every
/// connection busy.
const BUSY_REROUTE_PAUSE: Duration = Duration::from_millis(1);

/// Lifecycle of one transaction, logged at trace level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Created,
    Routed,
    Sent,
    AwaitingResponse,
    RetryPending,
}

/// Everything needed to run one transaction: the encoded frame plus
/// routing and retry inputs.
pub(crate) struct TxnPlan {
    frame: BytesMut,
    namespace: String,
    digest: KeyDigest,
    policy: WritePolicy,
    timeout: Duration,
    retry_limit: u32,
    retry_backoff: Duration,
}

impl TxnPlan {
    /// Reads retry on transient failure like `WritePolicy::Retry` writes.
    pub(crate) fn read(
        namespace: &str,
        digest: KeyDigest,
        frame: BytesMut,
        timeout: Duration,
        retry: &RetryConfig,
    ) -> TxnPlan {
        TxnPlan::write(namespace, digest, frame, WritePolicy::Retry, timeout, retry)
    }

    pub(crate) fn write(
        namespace: &str,
        digest: KeyDigest,
        frame: BytesMut,
        policy: WritePolicy,
        timeout: Duration,
        retry: &RetryConfig,
    ) -> TxnPlan {
        TxnPlan {
            frame,
            namespace: namespace.to_string(),
            digest,
            policy,
            timeout,
            retry_limit: retry.retry_limit,
            retry_backoff: retry.retry_backoff,
        }
    }

    /// Extra attempts allowed after the first; `None` means retry until
    /// the deadline.
    fn budget(&self) -> Option<u32> {
        match self.policy {
            WritePolicy::OneShot => Some(0),
            WritePolicy::Retry | WritePolicy::Async => Some(self.retry_limit),
            WritePolicy::Assured => None,
        }
    }
}

/// Decrements the in-flight gauge even when the transaction future is
/// dropped mid-run.
struct InFlightGuard<'a>(&'a ClusterShared);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.counters.in_progress.fetch_sub(1, Ordering::Release);
    }
}

/// Run one transaction to completion.
///
/// The deadline and the cluster drain signal preempt the attempt loop;
/// whichever fires first decides the outcome, and the counters record
/// exactly one terminal state per call.
pub(crate) async fn execute(shared: &Arc<ClusterShared>, plan: TxnPlan) -> Result<Record> {
    if shared.is_closed() {
        return Err(Error::ClusterClosed);
    }

    shared.counters.started.fetch_add(1, Ordering::Relaxed);
    shared.counters.in_progress.fetch_add(1, Ordering::Release);
    let _guard = InFlightGuard(shared);

    let deadline = tokio::time::Instant::now() + plan.timeout;
    let drain_rx = shared.drain_tx.subscribe();

    let outcome = tokio::select! {
        biased;
        _ = drained(drain_rx) => Err(Error::ClusterClosed),
        _ = tokio::time::sleep_until(deadline) => Err(Error::Timeout),
        outcome = run(shared, &plan) => outcome,
    };

    match &outcome {
        Ok(_) => {
            shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            trace!(digest = %plan.digest, "txn completed");
        }
        Err(Error::Timeout) => {
            shared.counters.timed_out.fetch_add(1, Ordering::Relaxed);
            debug!(digest = %plan.digest, "txn timed out");
        }
        Err(e) => {
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            debug!(digest = %plan.digest, error = %e, "txn failed");
        }
    }
    outcome
}

async fn drained(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without draining; nothing to preempt for.
            std::future::pending::<()>().await;
        }
    }
}

/// One attempt's classification.
enum Attempt {
    Done(Record),
    /// Pool had no free connection; re-route without spending budget.
    Busy,
    /// Worth retrying; the bool asks for a partition map refresh.
    Transient(Error, bool),
    Fatal(Error),
}

async fn run(shared: &Arc<ClusterShared>, plan: &TxnPlan) -> Result<Record> {
    let mut state = TxnState::Created;
    let mut budget = plan.budget();
    let mut attempts: u32 = 1;
    let mut avoid: Option<NodeRef> = None;

    loop {
        let Some(node) = shared.select_node(&plan.namespace, &plan.digest, avoid.as_ref()) else {
            if !consume_budget(shared, &mut budget) {
                return Err(exhausted(
                    Error::Server(ResultCode::Unavailable),
                    attempts,
                ));
            }
            attempts += 1;
            tokio::time::sleep(plan.retry_backoff).await;
            continue;
        };
        transition(&mut state, TxnState::Routed, plan);

        match attempt(&node, plan, &mut state).await {
            Attempt::Done(record) => return Ok(record),
            Attempt::Busy => {
                // Another node may have capacity right now; this is
                // congestion, not failure, so the budget is untouched.
                avoid = Some(node);
                tokio::time::sleep(BUSY_REROUTE_PAUSE).await;
            }
            Attempt::Transient(err, stale_map) => {
                if stale_map {
                    shared.nudge_tend();
                }
                if !consume_budget(shared, &mut budget) {
                    return Err(exhausted(err, attempts));
                }
                transition(&mut state, TxnState::RetryPending, plan);
                attempts += 1;
                avoid = Some(node);
                tokio::time::sleep(plan.retry_backoff).await;
            }
            Attempt::Fatal(err) => return Err(err),
        }
    }
}

/// Spend one retry from the budget; false means exhausted.
fn consume_budget(shared: &Arc<ClusterShared>, budget: &mut Option<u32>) -> bool {
    match budget {
        None => {
            shared.counters.retries.fetch_add(1, Ordering::Relaxed);
            true
        }
        Some(0) => false,
        Some(n) => {
            *n -= 1;
            shared.counters.retries.fetch_add(1, Ordering::Relaxed);
            true
        }
    }
}

/// Terminal error when the retry budget runs out, from the failure that
/// spent the last of it.
fn exhausted(last: Error, attempts: u32) -> Error {
    match last {
        // A server-side timeout at exhaustion is a timeout to the caller.
        Error::Server(ResultCode::ServerTimeout) => Error::Timeout,
        Error::Server(code) => Error::MaxRetriesExceeded { code, attempts },
        err => err,
    }
}

/// One exchange with one node.
async fn attempt(node: &NodeRef, plan: &TxnPlan, state: &mut TxnState) -> Attempt {
    let mut conn = match node.pool().acquire().await {
        Ok(Acquired::Conn(conn)) => conn,
        Ok(Acquired::Busy) => return Attempt::Busy,
        Err(e) => {
            node.record_failure();
            return Attempt::Transient(Error::Network(e), false);
        }
    };

    if let Err(e) = conn.conn().send(&plan.frame).await {
        conn.release(ConnOutcome::Broken);
        node.record_failure();
        return Attempt::Transient(Error::Network(e), false);
    }
    transition(state, TxnState::Sent, plan);

    if plan.policy == WritePolicy::Async {
        // Fire-and-forget: done once the frame is on the wire. A
        // background task drains the acknowledgment so the connection
        // can go back to the pool clean; the transaction deadline bounds
        // the drain so a silent server cannot pin the pool slot.
        let node = node.clone();
        let ack_deadline = plan.timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(ack_deadline, conn.conn().recv()).await {
                Ok(Ok(_)) => {
                    node.record_success();
                    conn.release(ConnOutcome::Healthy);
                }
                Ok(Err(_)) | Err(_) => {
                    node.record_failure();
                    conn.release(ConnOutcome::Broken);
                }
            }
        });
        return Attempt::Done(Record::default());
    }
    transition(state, TxnState::AwaitingResponse, plan);

    let (header, mut body) = match conn.conn().recv().await {
        Ok(frame) => frame,
        Err(e) => {
            conn.release(ConnOutcome::Broken);
            node.record_failure();
            return Attempt::Transient(Error::Network(e), false);
        }
    };
    if header.msg_type != PROTO_TYPE_MESSAGE {
        conn.release(ConnOutcome::Broken);
        node.record_failure();
        return Attempt::Transient(
            Error::Malformed(format!("unexpected message type {}", header.msg_type)),
            false,
        );
    }

    let frame = match response::parse(&mut body) {
        Ok(frame) => frame,
        Err(e) => {
            // Framing is gone; the connection cannot be trusted.
            conn.release(ConnOutcome::Broken);
            node.record_failure();
            return Attempt::Transient(e, false);
        }
    };
    conn.release(ConnOutcome::Healthy);
    node.record_success();

    let code = frame.result;
    if code.is_ok() {
        Attempt::Done(frame.into_record())
    } else if code.is_transient() {
        Attempt::Transient(Error::Server(code), code.invalidates_partition_map())
    } else {
        Attempt::Fatal(Error::Server(code))
    }
}

fn transition(state: &mut TxnState, to: TxnState, plan: &TxnPlan) {
    trace!(digest = %plan.digest, from = ?state, to = ?to, "txn state");
    *state = to;
}
