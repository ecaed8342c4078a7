//! Key digests and partition routing math.
//!
//! Every record is addressed by a fixed 20-byte digest, a deterministic
//! one-way hash of the set name and the canonical encoding of the key
//! value. The digest doubles as the partition-routing key: its low-order
//! bits select the partition, and the partition map names the owning node.

use crate::codec::value as value_codec;
use crate::types::Value;
use bytes::BytesMut;
use ripemd::{Digest as _, Ripemd160};
use std::fmt;

/// Byte length of a key digest.
pub const DIGEST_LEN: usize = 20;

/// A 20-byte record digest.
///
/// Pure function of `(set, key)`: identical inputs always produce the
/// identical digest, across processes and client versions.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDigest([u8; DIGEST_LEN]);

impl KeyDigest {
    /// Compute the digest of a `(set, key)` pair.
    ///
    /// Hashes the set-name bytes, then the key's wire tag, then the key's
    /// canonical payload encoding, so that two keys with equal `(set, key)`
    /// always collide and keys differing only in type never do.
    pub fn compute(set: &str, key: &Value) -> KeyDigest {
        let mut payload = BytesMut::with_capacity(value_codec::payload_len(key));
        value_codec::write_payload(key, &mut payload);

        let mut hasher = Ripemd160::new();
        hasher.update(set.as_bytes());
        hasher.update([key.particle_type()]);
        hasher.update(&payload);

        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&hasher.finalize());
        KeyDigest(out)
    }

    /// Wrap raw digest bytes (e.g. received from a peer or precomputed).
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> KeyDigest {
        KeyDigest(bytes)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Partition index for this digest.
    ///
    /// Uses the low-order bits of the first two digest bytes.
    /// `n_partitions` must be a power of two.
    pub fn partition_id(&self, n_partitions: usize) -> usize {
        debug_assert!(n_partitions.is_power_of_two());
        let low = u16::from_le_bytes([self.0[0], self.0[1]]) as usize;
        low & (n_partitions - 1)
    }
}

impl fmt::Debug for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyDigest({})", self)
    }
}

impl fmt::Display for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_digest_deterministic() {
        let a = KeyDigest::compute("users", &Value::from("k1"));
        let b = KeyDigest::compute("users", &Value::from("k1"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_depends_on_set_and_key() {
        let base = KeyDigest::compute("users", &Value::from("k1"));
        assert_ne!(base, KeyDigest::compute("other", &Value::from("k1")));
        assert_ne!(base, KeyDigest::compute("users", &Value::from("k2")));
    }

    #[test]
    fn test_digest_distinguishes_types() {
        // "1" as a string vs 1 as an integer must not collide.
        let s = KeyDigest::compute("s", &Value::from("1"));
        let i = KeyDigest::compute("s", &Value::Int(1));
        assert_ne!(s, i);
    }

    #[test]
    fn test_no_collisions_over_many_keys() {
        let mut seen = HashSet::new();
        for i in 0..10_000i64 {
            let d = KeyDigest::compute("bench", &Value::Int(i));
            assert!(seen.insert(*d.as_bytes()), "collision at key {}", i);
        }
    }

    #[test]
    fn test_partition_id_in_range() {
        for i in 0..1000i64 {
            let d = KeyDigest::compute("p", &Value::Int(i));
            assert!(d.partition_id(4096) < 4096);
            assert!(d.partition_id(1024) < 1024);
        }
    }

    #[test]
    fn test_partition_id_stable() {
        let d = KeyDigest::compute("p", &Value::from("k1"));
        assert_eq!(d.partition_id(4096), d.partition_id(4096));
    }
}
