//! Bucket sharding.
//!
//! Maps a file path onto one of `B` independent ordered shards via a fixed,
//! platform-independent 64-bit hash. The hash must not change between
//! releases for a given `(seed, path)` pair, or files would migrate buckets
//! and break per-shard ordering; SHA-256 (truncated to its first 8 bytes)
//! gives that stability without byte-order or word-size caveats.

use sha2::{Digest, Sha256};

/// Computes the fixed 64-bit hash of a path under the given seed.
#[must_use]
pub fn hash_path(path: &str, seed: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_be_bytes());
    hasher.update(path.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Returns the bucket id for a path: `hash_path(path, seed) mod buckets`.
///
/// With `buckets == 1` every path maps to bucket 0.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn bucket_for_path(path: &str, seed: u64, buckets: u32) -> u32 {
    debug_assert!(buckets >= 1, "bucket count must be positive");
    (hash_path(path, seed) % u64::from(buckets.max(1))) as u32
}
