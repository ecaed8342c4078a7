//! Shared fixtures for the integration suites.

use crate::config::{ClusterConfig, RetryConfig};
use crate::testing::mock::{info_frame, ownership_bitmap, ConnScript, MockConnector};
use crate::Cluster;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Namespace used throughout the suites.
pub const NS: &str = "test";

/// Route test logs through tracing when `RUST_LOG` asks for them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Partition count small enough to reason about by hand.
pub const PARTITIONS: usize = 16;

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Queue the two frames a tend round needs to bring a node up: the
/// identity probe and the replica-map fetch.
pub fn script_node_up(
    connector: &MockConnector,
    addr: SocketAddr,
    name: &str,
    n_partitions: usize,
    owned: impl IntoIterator<Item = usize>,
) {
    connector.script(
        addr,
        ConnScript::new().reply(info_frame(&[
            ("node", name),
            ("partition-generation", "1"),
            ("services", ""),
        ])),
    );
    let bitmap = ownership_bitmap(n_partitions, owned);
    let replicas = format!("{}:{}", NS, bitmap);
    connector.script(
        addr,
        ConnScript::new().reply(info_frame(&[("replicas-write", &replicas)])),
    );
}

/// Base config over the mock connector with a tend interval long enough
/// to keep the tender out of the way.
pub fn base_config(connector: Arc<MockConnector>) -> ClusterConfig {
    ClusterConfig::new()
        .with_partitions(PARTITIONS)
        .with_tend_interval(Duration::from_secs(3600))
        .with_connector(connector)
}

/// One-node cluster owning every partition of [`NS`].
pub async fn one_node_cluster(connector: &Arc<MockConnector>, retry: RetryConfig) -> Cluster {
    let a = addr(3000);
    connector.map_host("seed-a", 3000, a);
    script_node_up(connector, a, "A1", PARTITIONS, 0..PARTITIONS);
    let config = base_config(connector.clone())
        .with_seed("seed-a", 3000)
        .with_retry_config(retry);
    Cluster::connect(config).await.unwrap()
}
