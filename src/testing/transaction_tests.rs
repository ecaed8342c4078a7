//! Transaction behavior over a scripted one-node cluster: retry
//! budgets, error classification, deadlines, write policies and the
//! exactly-one-settlement bookkeeping.

use crate::config::{PoolConfig, RetryConfig};
use crate::error::{Error, ResultCode};
use crate::testing::mock::{message_frame, ConnScript, MockConnector};
use crate::testing::util::{addr, base_config, one_node_cluster, script_node_up, NS, PARTITIONS};
use crate::Cluster;
use crate::types::{Bin, Value, WriteParams, WritePolicy};
use std::time::Duration;

const T: Duration = Duration::from_secs(1);

fn ok_frame(generation: u32, bins: &[(&str, Value)]) -> Vec<u8> {
    message_frame(ResultCode::Ok, generation, bins)
}

fn code_frame(code: ResultCode) -> Vec<u8> {
    message_frame(code, 0, &[])
}

fn one_bin() -> Vec<Bin> {
    vec![Bin::new("v", Value::Int(1)).unwrap()]
}

#[tokio::test]
async fn test_get_returns_record() {
    crate::testing::util::init_tracing();
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    connector.script(
        addr(3000),
        ConnScript::new().reply(ok_frame(3, &[("v", Value::Int(7))])),
    );

    let record = cluster
        .get(NS, "s", &Value::from("k"), &["v"], T)
        .await
        .unwrap();
    assert_eq!(record.generation, 3);
    assert_eq!(record.bin("v"), Some(&Value::Int(7)));

    let stats = cluster.stats();
    assert_eq!(stats.requests_started, 1);
    assert_eq!(stats.requests_completed, 1);
    assert_eq!(stats.requests_failed, 0);
    assert_eq!(stats.requests_in_progress, 0);
}

#[tokio::test]
async fn test_not_found_is_definitive() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    connector.script(
        addr(3000),
        ConnScript::new().reply(code_frame(ResultCode::NotFound)),
    );

    let err = cluster
        .get_all(NS, "s", &Value::from("missing"), T)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Server(ResultCode::NotFound)));

    let stats = cluster.stats();
    assert_eq!(stats.retries, 0);
    assert_eq!(stats.requests_failed, 1);
}

#[tokio::test]
async fn test_generation_mismatch_not_retried() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    connector.script(
        addr(3000),
        ConnScript::new()
            .reply(code_frame(ResultCode::Generation))
            .reply(ok_frame(2, &[])),
    );

    let params = WriteParams::new().with_generation(1);
    let err = cluster
        .put(NS, "s", &Value::from("k"), &one_bin(), &params, T)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Server(ResultCode::Generation)));
    assert_eq!(cluster.stats().retries, 0);
}

#[tokio::test]
async fn test_generation_check_sequence() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    connector.script(
        addr(3000),
        ConnScript::new()
            .reply(ok_frame(2, &[]))
            .reply(ok_frame(3, &[]))
            .reply(code_frame(ResultCode::Generation)),
    );

    let key = Value::from("counter");
    let first = cluster
        .put(NS, "s", &key, &one_bin(), &WriteParams::new().with_generation(1), T)
        .await
        .unwrap();
    assert_eq!(first.generation, 2);

    let second = cluster
        .put(NS, "s", &key, &one_bin(), &WriteParams::new().with_generation(2), T)
        .await
        .unwrap();
    assert_eq!(second.generation, 3);

    // Stale expectation: definitive failure, no retry.
    let err = cluster
        .put(NS, "s", &key, &one_bin(), &WriteParams::new().with_generation(1), T)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Server(ResultCode::Generation)));
    assert_eq!(cluster.stats().retries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_retried_within_budget() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    // The connection survives clean transient replies, so all three
    // attempts reuse it.
    connector.script(
        addr(3000),
        ConnScript::new()
            .reply(code_frame(ResultCode::Unavailable))
            .reply(code_frame(ResultCode::Unavailable))
            .reply(ok_frame(1, &[])),
    );

    cluster
        .put(NS, "s", &Value::from("k"), &one_bin(), &WriteParams::new(), T)
        .await
        .unwrap();

    let stats = cluster.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.requests_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhausted() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default().with_retry_limit(2)).await;
    connector.script(
        addr(3000),
        ConnScript::new()
            .reply(code_frame(ResultCode::Unavailable))
            .reply(code_frame(ResultCode::Unavailable))
            .reply(code_frame(ResultCode::Unavailable)),
    );

    let err = cluster
        .put(NS, "s", &Value::from("k"), &one_bin(), &WriteParams::new(), T)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::MaxRetriesExceeded {
            code: ResultCode::Unavailable,
            attempts: 3,
        }
    ));

    let stats = cluster.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.requests_failed, 1);
    assert_eq!(stats.requests_completed, 0);
}

#[tokio::test]
async fn test_one_shot_never_retries() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    connector.script(
        addr(3000),
        ConnScript::new()
            .reply(code_frame(ResultCode::Unavailable))
            .reply(ok_frame(1, &[])),
    );

    let params = WriteParams::new().with_policy(WritePolicy::OneShot);
    let err = cluster
        .put(NS, "s", &Value::from("k"), &one_bin(), &params, T)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::MaxRetriesExceeded { attempts: 1, .. }
    ));
    assert_eq!(cluster.stats().retries, 0);
}

#[tokio::test]
async fn test_server_timeout_at_exhaustion_maps_to_timeout() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    connector.script(
        addr(3000),
        ConnScript::new().reply(code_frame(ResultCode::ServerTimeout)),
    );

    let params = WriteParams::new().with_policy(WritePolicy::OneShot);
    let err = cluster
        .put(NS, "s", &Value::from("k"), &one_bin(), &params, T)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert_eq!(cluster.stats().requests_timed_out, 1);
}

#[tokio::test(start_paused = true)]
async fn test_broken_connection_retried_on_fresh_one() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    // First connection dies mid-exchange; the retry must open a new one.
    connector.script(addr(3000), ConnScript::new().recv_error());
    connector.script(addr(3000), ConnScript::new().reply(ok_frame(5, &[])));

    let record = cluster
        .get_all(NS, "s", &Value::from("k"), T)
        .await
        .unwrap();
    assert_eq!(record.generation, 5);

    let stats = cluster.stats();
    assert_eq!(stats.requests_started, 1);
    assert_eq!(stats.requests_completed, 1);
    assert_eq!(stats.retries, 1);
}

#[tokio::test]
async fn test_one_shot_network_error_surfaces() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    connector.script(addr(3000), ConnScript::new().recv_error());

    let params = WriteParams::new().with_policy(WritePolicy::OneShot);
    let err = cluster
        .delete(NS, "s", &Value::from("k"), &params, T)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_preempts_slow_response() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    // The reply exists but arrives after the caller's deadline.
    connector.script(
        addr(3000),
        ConnScript::new().reply_after(Duration::from_secs(5), ok_frame(1, &[])),
    );

    let err = cluster
        .get_all(NS, "s", &Value::from("k"), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));

    let stats = cluster.stats();
    assert_eq!(stats.requests_timed_out, 1);
    assert_eq!(stats.requests_completed, 0);
    assert_eq!(stats.requests_in_progress, 0);
}

#[tokio::test(start_paused = true)]
async fn test_async_policy_completes_on_send() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    // Acknowledgment never arrives; the write must still complete.
    connector.script(addr(3000), ConnScript::new().hang());

    let params = WriteParams::new().with_policy(WritePolicy::Async);
    let record = tokio::time::timeout(
        Duration::from_millis(50),
        cluster.put(NS, "s", &Value::from("k"), &one_bin(), &params, T),
    )
    .await
    .expect("fire-and-forget write must not wait for the server")
    .unwrap();
    assert_eq!(record.generation, 0);
    assert_eq!(cluster.stats().requests_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_async_ack_wait_gives_up_at_deadline() {
    let connector = MockConnector::new();
    let a = addr(3000);
    connector.map_host("seed-a", 3000, a);
    script_node_up(&connector, a, "A1", PARTITIONS, 0..PARTITIONS);
    // A single pool slot: a stuck acknowledgment wait would starve it.
    let config = base_config(connector.clone())
        .with_seed("seed-a", 3000)
        .with_pool_config(PoolConfig::default().with_max_open(1));
    let cluster = Cluster::connect(config).await.unwrap();

    connector.script(a, ConnScript::new().hang());
    let params = WriteParams::new().with_policy(WritePolicy::Async);
    cluster
        .put(
            NS,
            "s",
            &Value::from("k"),
            &one_bin(),
            &params,
            Duration::from_millis(100),
        )
        .await
        .unwrap();

    // Past the write's deadline the hung connection must be discarded,
    // freeing the slot for the next request.
    tokio::time::sleep(Duration::from_secs(1)).await;
    connector.script(a, ConnScript::new().reply(ok_frame(5, &[])));
    let record = cluster
        .get_all(NS, "s", &Value::from("k"), T)
        .await
        .unwrap();
    assert_eq!(record.generation, 5);
}

#[tokio::test(start_paused = true)]
async fn test_assured_retries_until_deadline() {
    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default().with_retry_limit(0)).await;
    // Far more transient replies than any bounded budget would allow.
    let mut script = ConnScript::new();
    for _ in 0..10 {
        script = script.reply(code_frame(ResultCode::Unavailable));
    }
    script = script.reply(ok_frame(4, &[]));
    connector.script(addr(3000), script);

    let params = WriteParams::new().with_policy(WritePolicy::Assured);
    let record = cluster
        .put(NS, "s", &Value::from("k"), &one_bin(), &params, T)
        .await
        .unwrap();
    assert_eq!(record.generation, 4);
    assert_eq!(cluster.stats().retries, 10);
}

#[tokio::test]
async fn test_operate_mixed_batch() {
    use crate::types::Operation;

    let connector = MockConnector::new();
    let cluster = one_node_cluster(&connector, RetryConfig::default()).await;
    connector.script(
        addr(3000),
        ConnScript::new().reply(ok_frame(8, &[("count", Value::Int(43))])),
    );

    let ops = vec![
        Operation::add("count", 1).unwrap(),
        Operation::read("count").unwrap(),
    ];
    let record = cluster
        .operate(NS, "s", &Value::from("k"), &ops, &WriteParams::new(), T)
        .await
        .unwrap();
    assert_eq!(record.bin("count"), Some(&Value::Int(43)));
}
