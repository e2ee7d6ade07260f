//! Key-to-shard routing.
//!
//! Deterministic mapping from a key's UTF-8 bytes to a shard index.

use std::hash::Hasher;

use twox_hash::XxHash64;

// Fixed seed so routing stays stable for the lifetime of the process.
const SHARD_HASH_SEED: u64 = 0;

/// Maps a key to the index of its owning shard.
///
/// Uniform enough that entry counts stay balanced across shards for
/// typical workloads; shard count is fixed at startup so no remapping
/// property is needed.
pub fn shard_of(key: &str, shard_count: usize) -> usize {
    debug_assert!(shard_count > 0, "shard count must be non-zero");
    let mut hasher = XxHash64::with_seed(SHARD_HASH_SEED);
    hasher.write(key.as_bytes());
    (hasher.finish() % shard_count as u64) as usize
}
