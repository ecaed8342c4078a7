//! Configuration types for the cluster client.

use crate::net::Connector;
use crate::sync::{DefaultLockHooks, LockHooks};
use crate::types::Host;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Main configuration for a cluster handle.
#[derive(Clone)]
pub struct ClusterConfig {
    /// Seed hosts contacted at startup and on every tend round.
    pub seeds: Vec<Host>,

    /// Period of the background cluster-tend tick.
    pub tend_interval: Duration,

    /// Timeout for a single tend info probe.
    pub info_timeout: Duration,

    /// Number of partitions the cluster's key space is divided into.
    /// Must be a power of two.
    pub n_partitions: usize,

    /// Whether to follow cluster membership changes. When false the node
    /// set is frozen to explicitly added hosts (diagnostics only).
    pub follow: bool,

    /// Consecutive tend failures after which a node is marked down.
    pub node_down_threshold: u32,

    /// Consecutive failed tend rounds after which a down node is evicted.
    pub node_eviction_rounds: u32,

    /// Per-node connection pool settings.
    pub pool: PoolConfig,

    /// Retry behavior for transactions.
    pub retry: RetryConfig,

    /// Lock capability used for shared cluster state. Defaults to an
    /// in-process `parking_lot` implementation.
    pub lock_hooks: Arc<dyn LockHooks>,

    /// Connectivity capability override; `None` uses TCP. Intended for
    /// tests and instrumentation.
    pub connector: Option<Arc<dyn Connector>>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            tend_interval: Duration::from_secs(1),
            info_timeout: Duration::from_millis(700),
            n_partitions: 4096,
            follow: true,
            node_down_threshold: 3,
            node_eviction_rounds: 8,
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            lock_hooks: Arc::new(DefaultLockHooks),
            connector: None,
        }
    }
}

impl ClusterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a seed host.
    pub fn with_seed(mut self, host: impl Into<String>, port: u16) -> Self {
        self.seeds.push(Host::new(host, port));
        self
    }

    /// Set the tend period.
    pub fn with_tend_interval(mut self, interval: Duration) -> Self {
        self.tend_interval = interval;
        self
    }

    /// Set the partition count (power of two).
    pub fn with_partitions(mut self, n: usize) -> Self {
        self.n_partitions = n;
        self
    }

    /// Disable or enable membership following.
    pub fn with_follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    /// Set pool settings.
    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set retry settings.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Inject a lock capability.
    pub fn with_lock_hooks(mut self, hooks: Arc<dyn LockHooks>) -> Self {
        self.lock_hooks = hooks;
        self
    }

    /// Inject a connectivity capability (tests, instrumentation).
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("seeds", &self.seeds)
            .field("tend_interval", &self.tend_interval)
            .field("info_timeout", &self.info_timeout)
            .field("n_partitions", &self.n_partitions)
            .field("follow", &self.follow)
            .field("node_down_threshold", &self.node_down_threshold)
            .field("node_eviction_rounds", &self.node_eviction_rounds)
            .field("pool", &self.pool)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Per-node connection pool settings.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Hard cap on open connections per node; `acquire` past this point
    /// reports busy instead of opening more.
    pub max_open: usize,

    /// Idle connections kept for reuse; extras are closed on release.
    pub max_idle: usize,

    /// Timeout for opening one connection.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 64,
            max_idle: 16,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn with_max_open(mut self, n: usize) -> Self {
        self.max_open = n;
        self
    }

    pub fn with_max_idle(mut self, n: usize) -> Self {
        self.max_idle = n;
        self
    }

    pub fn with_connect_timeout(mut self, t: Duration) -> Self {
        self.connect_timeout = t;
        self
    }
}

/// Transaction retry settings.
///
/// `retry_limit` bounds the `Retry` write policy (and reads); the
/// `Assured` policy ignores it and retries until the transaction deadline.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Retries allowed under the bounded `Retry` policy.
    pub retry_limit: u32,

    /// Pause between consecutive retries of one transaction.
    pub retry_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryConfig {
    pub fn with_retry_limit(mut self, n: u32) -> Self {
        self.retry_limit = n;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.n_partitions, 4096);
        assert!(config.follow);
        assert!(config.seeds.is_empty());
        assert_eq!(config.retry.retry_limit, 2);
        assert_eq!(config.pool.max_open, 64);
    }

    #[test]
    fn test_builder() {
        let config = ClusterConfig::new()
            .with_seed("10.0.0.1", 3000)
            .with_seed("10.0.0.2", 3000)
            .with_partitions(1024)
            .with_follow(false)
            .with_retry_config(RetryConfig::default().with_retry_limit(5));

        assert_eq!(config.seeds.len(), 2);
        assert_eq!(config.n_partitions, 1024);
        assert!(!config.follow);
        assert_eq!(config.retry.retry_limit, 5);
    }
}
