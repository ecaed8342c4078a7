//! Cluster lifecycle over scripted nodes: seeding, peer discovery,
//! partition-aware routing, eviction and shutdown.

use crate::config::RetryConfig;
use crate::digest::KeyDigest;
use crate::error::{Error, ResultCode};
use crate::testing::mock::{info_frame, message_frame, ConnScript, MockConnector};
use crate::testing::util::{addr, base_config, one_node_cluster, script_node_up, NS, PARTITIONS};
use crate::types::Value;
use crate::Cluster;
use std::time::Duration;

const T: Duration = Duration::from_secs(1);

/// Digest whose low bytes place it in the given partition.
fn digest_in_partition(pid: u8) -> KeyDigest {
    let mut bytes = [0u8; 20];
    bytes[0] = pid;
    KeyDigest::from_bytes(bytes)
}

async fn two_node_cluster(connector: &std::sync::Arc<MockConnector>) -> Cluster {
    let a = addr(3101);
    let b = addr(3102);
    connector.map_host("seed-a", 3101, a);
    connector.map_host("seed-b", 3102, b);
    script_node_up(connector, a, "A1", PARTITIONS, 0..PARTITIONS / 2);
    script_node_up(connector, b, "B1", PARTITIONS, PARTITIONS / 2..PARTITIONS);

    let config = base_config(connector.clone())
        .with_seed("seed-a", 3101)
        .with_seed("seed-b", 3102)
        .with_retry_config(RetryConfig::default());
    Cluster::connect(config).await.unwrap()
}

#[tokio::test]
async fn test_connect_requires_seeds_and_sane_partitions() {
    let connector = MockConnector::new();
    let err = Cluster::connect(base_config(connector.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let config = base_config(connector)
        .with_seed("seed-a", 3000)
        .with_partitions(1000); // not a power of two
    assert!(matches!(
        Cluster::connect(config).await,
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn test_seed_with_no_addresses_is_skipped() {
    let connector = MockConnector::new();
    let a = addr(3000);
    connector.map_host_unroutable("seed-stale", 2999);
    connector.map_host("seed-a", 3000, a);
    script_node_up(&connector, a, "A1", PARTITIONS, 0..PARTITIONS);

    let config = base_config(connector.clone())
        .with_seed("seed-stale", 2999)
        .with_seed("seed-a", 3000);
    let cluster = Cluster::connect(config).await.unwrap();
    assert_eq!(cluster.active_node_count(), 1);
}

#[tokio::test]
async fn test_cluster_handle_is_debuggable() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    let rendered = format!("{:?}", cluster);
    assert!(rendered.contains("Cluster"));
    assert!(rendered.contains("nodes"));
}

#[tokio::test]
async fn test_requests_route_to_partition_owner() {
    let connector = MockConnector::new();
    let cluster = two_node_cluster(&connector).await;
    assert_eq!(cluster.active_node_count(), 2);

    let a = addr(3101);
    let b = addr(3102);
    // Distinguish the serving node by the generation it reports.
    connector.script(a, ConnScript::new().reply(message_frame(ResultCode::Ok, 10, &[])));
    connector.script(b, ConnScript::new().reply(message_frame(ResultCode::Ok, 20, &[])));

    let low = cluster
        .get_digest(NS, &digest_in_partition(0), None, T)
        .await
        .unwrap();
    assert_eq!(low.generation, 10);

    let high = cluster
        .get_digest(NS, &digest_in_partition(PARTITIONS as u8 / 2), None, T)
        .await
        .unwrap();
    assert_eq!(high.generation, 20);
}

#[tokio::test]
async fn test_unmapped_namespace_falls_back_to_any_node() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    connector.script(
        addr(3000),
        ConnScript::new().reply(message_frame(ResultCode::Ok, 1, &[])),
    );

    cluster
        .get_digest("unmapped", &digest_in_partition(3), None, T)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_advertised_peers_are_followed() {
    crate::testing::util::init_tracing();
    let connector = MockConnector::new();
    let a = addr(3101);
    let b = addr(3102);
    connector.map_host("seed-a", 3101, a);

    // A advertises B through `services`; B joins on the next round.
    connector.script(
        a,
        ConnScript::new().reply(info_frame(&[
            ("node", "A1"),
            ("partition-generation", "1"),
            ("services", "127.0.0.1:3102"),
        ])),
    );
    let replicas = format!(
        "{}:{}",
        NS,
        crate::testing::mock::ownership_bitmap(PARTITIONS, 0..PARTITIONS / 2)
    );
    connector.script(
        a,
        ConnScript::new().reply(info_frame(&[("replicas-write", &replicas)])),
    );
    // Round-two probe of A: nothing changed.
    connector.script(
        a,
        ConnScript::new().reply(info_frame(&[
            ("node", "A1"),
            ("partition-generation", "1"),
            ("services", "127.0.0.1:3102"),
        ])),
    );
    script_node_up(&connector, b, "B1", PARTITIONS, PARTITIONS / 2..PARTITIONS);

    let cluster = Cluster::connect(base_config(connector.clone()).with_seed("seed-a", 3101))
        .await
        .unwrap();
    assert_eq!(cluster.active_node_count(), 1);

    tokio::time::sleep(Duration::from_secs(3601)).await;
    assert_eq!(cluster.active_node_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_added_host_probed_on_nudge() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    let a = addr(3000);
    let b = addr(3102);
    // The nudged round re-probes the known node, then the new seed.
    connector.script(
        a,
        ConnScript::new().reply(info_frame(&[
            ("node", "A1"),
            ("partition-generation", "1"),
            ("services", ""),
        ])),
    );
    script_node_up(&connector, b, "B1", PARTITIONS, 0..0);

    cluster.add_host("127.0.0.1", 3102);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cluster.active_node_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_node_evicted() {
    let connector = MockConnector::new();
    let a = addr(3000);
    connector.map_host("seed-a", 3000, a);
    script_node_up(&connector, a, "A1", PARTITIONS, 0..PARTITIONS);

    let mut config = base_config(connector.clone()).with_seed("seed-a", 3000);
    config.node_eviction_rounds = 2;
    let cluster = Cluster::connect(config).await.unwrap();
    assert_eq!(cluster.active_node_count(), 1);

    // No more scripts: every probe from here on fails.
    tokio::time::sleep(Duration::from_secs(3601)).await;
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(cluster.active_node_count(), 0);
    assert_eq!(cluster.stats().nodes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_rejects_new_requests() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;

    cluster.close(Duration::from_millis(100)).await;
    let err = cluster
        .get_all(NS, "s", &Value::from("k"), T)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ClusterClosed));

    // Closing again is a no-op.
    cluster.close(Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn test_close_fails_stragglers_after_grace() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    // A request that would otherwise outlive any reasonable grace.
    connector.script(addr(3000), ConnScript::new().hang());

    let pending = {
        let cluster = cluster.clone();
        tokio::spawn(async move {
            cluster
                .get_all(NS, "s", &Value::from("k"), Duration::from_secs(60))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(cluster.requests_in_progress(), 1);

    cluster.close(Duration::from_millis(100)).await;
    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::ClusterClosed)));
    assert_eq!(cluster.requests_in_progress(), 0);
}
