//! Background membership maintenance.
//!
//! The tender wakes on an interval (or a nudge from a transaction that
//! saw evidence of cluster movement) and runs one round: probe every
//! known node, refresh partition tables whose generation moved, follow
//! advertised peers, probe unresolved seeds, and evict nodes that have
//! failed too many consecutive rounds.

use crate::cluster::cluster::ClusterShared;
use crate::cluster::info;
use crate::cluster::node::{Node, NodeRef};
use crate::codec::info::find;
use crate::pool::ConnectionPool;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const TEND_NAMES: &[&str] = &["node", "partition-generation", "services"];

/// Tender task body; runs until the stop signal fires.
pub(crate) async fn run(
    shared: Arc<ClusterShared>,
    mut stop_rx: watch::Receiver<bool>,
    mut nudge_rx: mpsc::Receiver<()>,
) {
    let mut interval = tokio::time::interval(shared.config.tend_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; connect already ran a round.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    debug!("tender stopping");
                    return;
                }
            }
            _ = interval.tick() => tend_once(&shared).await,
            nudged = nudge_rx.recv() => {
                if nudged.is_none() {
                    return;
                }
                tend_once(&shared).await;
            }
        }
    }
}

/// One maintenance round.
pub(crate) async fn tend_once(shared: &Arc<ClusterShared>) {
    let (seeds, nodes) = {
        let state = shared.state.lock();
        (state.seeds.clone(), state.nodes.clone())
    };

    for node in &nodes {
        probe_node(shared, node).await;
    }

    // Probe seeds that do not correspond to a known node yet.
    let known_addrs: Vec<SocketAddr> = {
        let state = shared.state.lock();
        state.nodes.iter().map(|n| n.addr()).collect()
    };
    for seed in &seeds {
        let addrs = match shared.connector.resolve(&seed.name, seed.port).await {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!(seed = %seed, error = %e, "seed resolution failed");
                continue;
            }
        };
        let Some(addr) = addrs.first().copied() else {
            debug!(seed = %seed, "seed resolved to no addresses");
            continue;
        };
        if known_addrs.contains(&addr) {
            continue;
        }
        if let Err(e) = discover_node(shared, addr).await {
            debug!(seed = %seed, error = %e, "seed probe failed");
        }
    }

    let (node_count, usable) = {
        let state = shared.state.lock();
        (
            state.nodes.len(),
            state.nodes.iter().filter(|n| n.is_usable()).count(),
        )
    };
    let c = &shared.counters;
    debug!(
        nodes = node_count,
        usable,
        started = c.started.load(Ordering::Relaxed),
        completed = c.completed.load(Ordering::Relaxed),
        failed = c.failed.load(Ordering::Relaxed),
        timed_out = c.timed_out.load(Ordering::Relaxed),
        retries = c.retries.load(Ordering::Relaxed),
        in_progress = c.in_progress.load(Ordering::Relaxed),
        "tend round complete"
    );
}

/// Probe one known node and apply what it reports.
async fn probe_node(shared: &Arc<ClusterShared>, node: &NodeRef) {
    let pairs = match info::request_with(
        &shared.connector,
        node.addr(),
        TEND_NAMES,
        shared.config.info_timeout,
    )
    .await
    {
        Ok(pairs) => pairs,
        Err(e) => {
            let rounds = node.record_tend_failure();
            debug!(node = node.name(), error = %e, rounds, "tend probe failed");
            if rounds >= shared.config.node_eviction_rounds {
                evict(shared, node);
            }
            return;
        }
    };
    node.record_success();

    // A different name at the same address means the node was replaced.
    if find(&pairs, "node").is_some_and(|name| name != node.name()) {
        warn!(node = node.name(), addr = %node.addr(), "node identity changed");
        evict(shared, node);
        return;
    }

    if let Some(generation) = find(&pairs, "partition-generation")
        .and_then(|v| v.parse::<i64>().ok())
    {
        if generation != node.partition_generation() {
            refresh_partitions(shared, node, generation).await;
        }
    }

    follow_peers(shared, &pairs);
}

/// Probe a fresh address and add it as a node if it is one we do not
/// already know by name.
async fn discover_node(shared: &Arc<ClusterShared>, addr: SocketAddr) -> crate::error::Result<()> {
    let pairs = info::request_with(
        &shared.connector,
        addr,
        TEND_NAMES,
        shared.config.info_timeout,
    )
    .await?;

    let Some(name) = find(&pairs, "node").filter(|n| !n.is_empty()) else {
        return Ok(());
    };

    let node = {
        let mut state = shared.state.lock();
        if state.nodes.iter().any(|n| n.name() == name) {
            return Ok(());
        }
        let pool = ConnectionPool::new(addr, shared.connector.clone(), shared.config.pool);
        let node = Node::new(name, addr, pool, shared.config.node_down_threshold);
        state.nodes.push(node.clone());
        node
    };
    info!(node = node.name(), addr = %addr, "node added");

    if let Some(generation) = find(&pairs, "partition-generation")
        .and_then(|v| v.parse::<i64>().ok())
    {
        refresh_partitions(shared, &node, generation).await;
    }
    follow_peers(shared, &pairs);
    Ok(())
}

/// Fetch a node's write-replica bitmaps and fold them into the
/// partition map, then record the generation they belong to.
async fn refresh_partitions(shared: &Arc<ClusterShared>, node: &NodeRef, generation: i64) {
    let pairs = match info::request_with(
        &shared.connector,
        node.addr(),
        &["replicas-write"],
        shared.config.info_timeout,
    )
    .await
    {
        Ok(pairs) => pairs,
        Err(e) => {
            debug!(node = node.name(), error = %e, "replica map fetch failed");
            return;
        }
    };
    let Some(replicas) = find(&pairs, "replicas-write") else {
        return;
    };

    // Value is `ns1:BITMAP;ns2:BITMAP`, one base64 bitmap per namespace.
    let mut state = shared.state.lock();
    for entry in replicas.split(';').filter(|e| !e.is_empty()) {
        let Some((namespace, bitmap)) = entry.split_once(':') else {
            warn!(node = node.name(), entry, "unparseable replica entry");
            continue;
        };
        if let Err(e) = state.partitions.update_from_bitmap(namespace, node, bitmap) {
            warn!(node = node.name(), namespace, error = %e, "replica bitmap rejected");
        }
    }
    node.set_partition_generation(generation);
    debug!(node = node.name(), generation, "partition map refreshed");
}

/// Add peer addresses advertised through `services` to the seed list,
/// when following is enabled. They get probed on the next round.
fn follow_peers(shared: &Arc<ClusterShared>, pairs: &[(String, String)]) {
    let Some(services) = find(pairs, "services").filter(|v| !v.is_empty()) else {
        return;
    };
    let mut state = shared.state.lock();
    if !state.follow {
        return;
    }
    for entry in services.split(';').filter(|e| !e.is_empty()) {
        let Some((host, port)) = entry.rsplit_once(':') else {
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        let host = crate::types::Host::new(host, port);
        if !state.seeds.contains(&host) {
            debug!(peer = %host, "following advertised peer");
            state.seeds.push(host);
        }
    }
}

/// Remove a node from membership and release its resources.
fn evict(shared: &Arc<ClusterShared>, node: &NodeRef) {
    let removed = {
        let mut state = shared.state.lock();
        let before = state.nodes.len();
        state.nodes.retain(|n| !Arc::ptr_eq(n, node));
        state.partitions.remove_node(node);
        before != state.nodes.len()
    };
    if removed {
        node.pool().close_idle();
        warn!(node = node.name(), addr = %node.addr(), "node evicted");
    }
}
