//! Cluster state: nodes, partition ownership, background tending and the
//! application-visible handle.

pub mod info;
pub mod node;
pub mod partition;
pub(crate) mod tend;

#[allow(clippy::module_inception)]
mod cluster;

pub use cluster::{Cluster, ClusterStats};
pub(crate) use cluster::ClusterShared;
pub use node::{Node, NodeHealth, NodeRef};
pub use partition::PartitionMap;
