//! Asynchronous client for a partitioned key-value server cluster.
//!
//! The crate keeps a live model of the cluster and routes every
//! single-record transaction straight to the node that owns the record:
//! - **Digest routing**: keys are hashed to a fixed 20-byte digest and
//!   the digest's low bits pick the partition, so routing never needs
//!   the server's help
//! - **Background tending**: a maintenance task discovers peers,
//!   tracks node health and refreshes partition ownership as the
//!   cluster moves
//! - **Per-node connection pools** with a hard open cap; a saturated
//!   pool re-routes rather than queues
//! - **Policy-driven retries**: transient failures retry within the
//!   write policy's budget, definitive server answers never do, and
//!   the caller's deadline preempts everything
//!
//! # Example
//!
//! ```rust,no_run
//! use pomelo::{Cluster, ClusterConfig, Bin, Value, WriteParams};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> pomelo::Result<()> {
//!     let config = ClusterConfig::new().with_seed("10.0.0.1", 3000);
//!     let cluster = Cluster::connect(config).await?;
//!
//!     let timeout = Duration::from_millis(200);
//!     let bins = vec![Bin::new("greeting", "hello")?];
//!     cluster
//!         .put("test", "demo", &Value::from("key1"), &bins, &WriteParams::new(), timeout)
//!         .await?;
//!
//!     let record = cluster
//!         .get_all("test", "demo", &Value::from("key1"), timeout)
//!         .await?;
//!     println!("greeting = {:?}", record.bin("greeting"));
//!
//!     cluster.close(Duration::from_secs(1)).await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Cluster API                  │
//! │   get / put / delete / operate (+_digest)    │
//! └──────────────────────────────────────────────┘
//!          │ digest → partition → owner
//!          ▼
//! ┌──────────────┐   ┌──────────────┐
//! │  Node pools  │◄──│    Tender    │ probes, discovers,
//! │ (per node)   │   │ (background) │ refreshes ownership
//! └──────────────┘   └──────────────┘
//!          │ one frame per transaction
//!          ▼
//! ┌──────────────────────────────────────────────┐
//! │        Wire codec (message + info)           │
//! └──────────────────────────────────────────────┘
//! ```

pub mod cluster;
pub mod codec;
pub mod config;
pub mod digest;
pub mod error;
pub mod net;
pub mod pool;
pub mod sync;
pub mod testing;
pub mod types;

mod transaction;

pub use cluster::{Cluster, ClusterStats};
pub use config::{ClusterConfig, PoolConfig, RetryConfig};
pub use digest::{KeyDigest, DIGEST_LEN};
pub use error::{Error, NetworkError, Result, ResultCode};
pub use types::{
    Bin, BinName, BlobKind, Host, Operation, OperationKind, Record, Value, WriteParams,
    WritePolicy,
};

/// One-shot info query against a single host; see [`cluster::info`].
pub use cluster::info::request as info;
