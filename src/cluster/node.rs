//! One cluster member: identity, health state and its connection pool.

use crate::pool::ConnectionPool;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Shared handle to a node.
pub type NodeRef = Arc<Node>;

/// Derived health state of a node.
///
/// Driven by consecutive failures: any success resets to `Up`, the first
/// failure moves to `Suspect`, and reaching the configured threshold
/// marks the node `Down`. Down nodes are skipped by routing and
/// eventually evicted by the tender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeHealth {
    Up,
    Suspect,
    Down,
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeHealth::Up => f.write_str("up"),
            NodeHealth::Suspect => f.write_str("suspect"),
            NodeHealth::Down => f.write_str("down"),
        }
    }
}

/// A cluster member.
pub struct Node {
    name: String,
    addr: SocketAddr,
    pool: ConnectionPool,
    down_threshold: u32,

    /// Consecutive failures from any context (broken connection releases,
    /// failed tend probes); resets on any success.
    consecutive_failures: AtomicU32,

    /// Consecutive failed tend rounds, for eviction. Only the tender
    /// touches this.
    failed_tend_rounds: AtomicU32,

    /// Partition generation last seen by the tender; -1 before the first
    /// successful probe.
    partition_generation: AtomicI64,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        addr: SocketAddr,
        pool: ConnectionPool,
        down_threshold: u32,
    ) -> NodeRef {
        Arc::new(Node {
            name: name.into(),
            addr,
            pool,
            down_threshold: down_threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            failed_tend_rounds: AtomicU32::new(0),
            partition_generation: AtomicI64::new(-1),
        })
    }

    /// Server-assigned node name, stable across address changes.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Current derived health state.
    pub fn health(&self) -> NodeHealth {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures == 0 {
            NodeHealth::Up
        } else if failures < self.down_threshold {
            NodeHealth::Suspect
        } else {
            NodeHealth::Down
        }
    }

    /// Whether routing may target this node.
    pub fn is_usable(&self) -> bool {
        self.health() != NodeHealth::Down
    }

    /// Record a successful exchange with this node.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.failed_tend_rounds.store(0, Ordering::Relaxed);
    }

    /// Record a failure; returns the resulting health state.
    pub fn record_failure(&self) -> NodeHealth {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let health = if failures < self.down_threshold {
            NodeHealth::Suspect
        } else {
            NodeHealth::Down
        };
        if failures == self.down_threshold {
            warn!(node = %self.name, addr = %self.addr, "node marked down");
        }
        health
    }

    /// Record a failed tend round; returns the consecutive count.
    pub(crate) fn record_tend_failure(&self) -> u32 {
        self.record_failure();
        self.failed_tend_rounds.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn partition_generation(&self) -> i64 {
        self.partition_generation.load(Ordering::Relaxed)
    }

    pub(crate) fn set_partition_generation(&self, generation: i64) {
        self.partition_generation.store(generation, Ordering::Relaxed);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("health", &self.health())
            .finish()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Node {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::net::TcpConnector;

    fn test_node(threshold: u32) -> NodeRef {
        let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
        let pool = ConnectionPool::new(addr, Arc::new(TcpConnector::default()), PoolConfig::default());
        Node::new("N1", addr, pool, threshold)
    }

    #[test]
    fn test_health_transitions() {
        let node = test_node(3);
        assert_eq!(node.health(), NodeHealth::Up);

        assert_eq!(node.record_failure(), NodeHealth::Suspect);
        assert_eq!(node.record_failure(), NodeHealth::Suspect);
        assert_eq!(node.record_failure(), NodeHealth::Down);
        assert!(!node.is_usable());

        node.record_success();
        assert_eq!(node.health(), NodeHealth::Up);
        assert!(node.is_usable());
    }

    #[test]
    fn test_tend_failure_rounds() {
        let node = test_node(2);
        assert_eq!(node.record_tend_failure(), 1);
        assert_eq!(node.record_tend_failure(), 2);
        node.record_success();
        assert_eq!(node.record_tend_failure(), 1);
    }

    #[test]
    fn test_partition_generation_starts_unset() {
        let node = test_node(3);
        assert_eq!(node.partition_generation(), -1);
        node.set_partition_generation(7);
        assert_eq!(node.partition_generation(), 7);
    }
}
