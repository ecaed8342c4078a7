//! Partition ownership tables, one per namespace.
//!
//! Each namespace maps every partition id to the node that currently
//! owns it. Ownership is learned from the `replicas-write` info value,
//! which carries one base64 bitmap per namespace: bit `i` set means the
//! reporting node owns partition `i`.

use crate::cluster::node::NodeRef;
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;
use tracing::debug;

/// Per-namespace partition ownership.
pub struct PartitionMap {
    n_partitions: usize,
    tables: HashMap<String, Vec<Option<NodeRef>>>,
}

impl PartitionMap {
    pub fn new(n_partitions: usize) -> Self {
        PartitionMap {
            n_partitions,
            tables: HashMap::new(),
        }
    }

    pub fn n_partitions(&self) -> usize {
        self.n_partitions
    }

    /// Current owner of `pid` in `namespace`, if known and usable.
    pub fn owner(&self, namespace: &str, pid: usize) -> Option<NodeRef> {
        self.tables
            .get(namespace)
            .and_then(|table| table.get(pid))
            .and_then(|slot| slot.clone())
            .filter(|node| node.is_usable())
    }

    /// Apply one node's ownership bitmap for a namespace.
    ///
    /// The bitmap claims ownership for set bits; clear bits only release
    /// a partition if this node was the recorded owner, so a stale map
    /// from one node cannot erase a fresher claim from another.
    pub fn update_from_bitmap(&mut self, namespace: &str, node: &NodeRef, b64: &str) -> Result<()> {
        let bytes = BASE64
            .decode(b64.trim())
            .map_err(|e| Error::Malformed(format!("partition bitmap for {}: {}", namespace, e)))?;
        if bytes.len() * 8 < self.n_partitions {
            return Err(Error::Malformed(format!(
                "partition bitmap for {} covers {} partitions, need {}",
                namespace,
                bytes.len() * 8,
                self.n_partitions
            )));
        }

        let table = self
            .tables
            .entry(namespace.to_string())
            .or_insert_with(|| vec![None; self.n_partitions]);

        let mut claimed = 0usize;
        for pid in 0..self.n_partitions {
            let set = bytes[pid >> 3] & (0x80 >> (pid & 7)) != 0;
            if set {
                table[pid] = Some(node.clone());
                claimed += 1;
            } else if table[pid].as_ref().is_some_and(|owner| owner == node) {
                table[pid] = None;
            }
        }
        debug!(
            node = node.name(),
            namespace, claimed, "partition table updated"
        );
        Ok(())
    }

    /// Drop every ownership entry pointing at an evicted node.
    pub fn remove_node(&mut self, node: &NodeRef) {
        for table in self.tables.values_mut() {
            for slot in table.iter_mut() {
                if slot.as_ref().is_some_and(|owner| owner == node) {
                    *slot = None;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_owner(&mut self, namespace: &str, pid: usize, node: NodeRef) {
        let n = self.n_partitions;
        let table = self
            .tables
            .entry(namespace.to_string())
            .or_insert_with(|| vec![None; n]);
        table[pid] = Some(node);
    }
}
