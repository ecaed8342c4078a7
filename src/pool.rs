//! Per-node connection pool.
//!
//! A pool owns a bounded set of reusable connections to one node. A
//! transaction acquires a connection for its whole lifetime and releases
//! it with an outcome: healthy connections go back on the idle list,
//! broken ones are closed and never handed out again. When the pool is at
//! its open-connection cap, `acquire` reports [`Acquired::Busy`] instead
//! of failing — the transaction engine treats that as a re-route, never a
//! fatal error.

use crate::config::PoolConfig;
use crate::error::NetworkError;
use crate::net::{Connection, Connector};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of releasing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnOutcome {
    /// The connection is intact and may be reused.
    Healthy,
    /// The connection failed or delivered garbage; close it.
    Broken,
}

/// Result of an acquire attempt.
pub enum Acquired {
    /// A connection, exclusively owned until released.
    Conn(PooledConn),
    /// The pool is at its cap with nothing idle.
    Busy,
}

/// Counters for pool introspection.
#[derive(Debug, Default)]
struct PoolCounters {
    opened: AtomicUsize,
    busy_rejections: AtomicUsize,
    broken_drops: AtomicUsize,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub open: usize,
    pub idle: usize,
    pub opened_total: usize,
    pub busy_rejections: usize,
    pub broken_drops: usize,
}

struct PoolInner {
    addr: SocketAddr,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    open: AtomicUsize,
    counters: PoolCounters,
}

/// Bounded pool of connections to one node. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(addr: SocketAddr, connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                addr,
                connector,
                config,
                idle: Mutex::new(Vec::new()),
                open: AtomicUsize::new(0),
                counters: PoolCounters::default(),
            }),
        }
    }

    /// The node address this pool serves.
    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// Hand out an idle connection, open a new one below the cap, or
    /// report busy.
    pub async fn acquire(&self) -> Result<Acquired, NetworkError> {
        if let Some(conn) = self.inner.idle.lock().pop() {
            trace!(addr = %self.inner.addr, "reusing pooled connection");
            return Ok(Acquired::Conn(PooledConn {
                conn: Some(conn),
                pool: self.clone(),
            }));
        }

        // Reserve an open slot before connecting so concurrent acquires
        // cannot blow past the cap.
        let mut open = self.inner.open.load(Ordering::Relaxed);
        loop {
            if open >= self.inner.config.max_open {
                self.inner
                    .counters
                    .busy_rejections
                    .fetch_add(1, Ordering::Relaxed);
                return Ok(Acquired::Busy);
            }
            match self.inner.open.compare_exchange_weak(
                open,
                open + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => open = current,
            }
        }

        match self.inner.connector.connect(self.inner.addr).await {
            Ok(conn) => {
                self.inner.counters.opened.fetch_add(1, Ordering::Relaxed);
                debug!(addr = %self.inner.addr, "opened connection");
                Ok(Acquired::Conn(PooledConn {
                    conn: Some(conn),
                    pool: self.clone(),
                }))
            }
            Err(e) => {
                self.inner.open.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    fn give_back(&self, conn: Box<dyn Connection>, outcome: ConnOutcome) {
        match outcome {
            ConnOutcome::Healthy => {
                let mut idle = self.inner.idle.lock();
                if idle.len() < self.inner.config.max_idle {
                    idle.push(conn);
                    return;
                }
                // Idle list full; close the surplus connection.
                drop(idle);
                self.inner.open.fetch_sub(1, Ordering::AcqRel);
            }
            ConnOutcome::Broken => {
                self.inner.open.fetch_sub(1, Ordering::AcqRel);
                self.inner
                    .counters
                    .broken_drops
                    .fetch_add(1, Ordering::Relaxed);
                debug!(addr = %self.inner.addr, "dropped broken connection");
            }
        }
    }

    /// Close all idle connections. Held connections close as their owners
    /// release them.
    pub fn close_idle(&self) {
        let drained: Vec<_> = self.inner.idle.lock().drain(..).collect();
        self.inner.open.fetch_sub(drained.len(), Ordering::AcqRel);
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            open: self.inner.open.load(Ordering::Relaxed),
            idle: self.inner.idle.lock().len(),
            opened_total: self.inner.counters.opened.load(Ordering::Relaxed),
            busy_rejections: self.inner.counters.busy_rejections.load(Ordering::Relaxed),
            broken_drops: self.inner.counters.broken_drops.load(Ordering::Relaxed),
        }
    }
}

/// A connection checked out of a pool, exclusively owned by one
/// transaction until released.
pub struct PooledConn {
    conn: Option<Box<dyn Connection>>,
    pool: ConnectionPool,
}

impl PooledConn {
    /// Access the underlying connection.
    pub fn conn(&mut self) -> &mut dyn Connection {
        self.conn
            .as_deref_mut()
            .expect("connection already released")
    }

    /// Return the connection to its pool with an outcome.
    pub fn release(mut self, outcome: ConnOutcome) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn, outcome);
        }
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        // A connection dropped without explicit release (cancelled future,
        // elapsed deadline mid-receive) may have a response in flight, so
        // it cannot be reused.
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn, ConnOutcome::Broken);
        }
    }
}
