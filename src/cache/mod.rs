//! Cache Engine
//!
//! Sharded in-memory key-value storage with per-key TTL expiration,
//! size-aware LRU eviction, and optimistic concurrency control via
//! version tokens. The HTTP boundary only ever talks to the
//! [`CacheStore`] façade; shards and their internals stay private to
//! this module tree.

mod entry;
mod hasher;
mod lru;
mod shard;
mod stats;
mod store;
mod ttl_heap;
mod value;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry};
pub use hasher::shard_of;
pub use lru::SizeAwareLru;
pub use shard::{IncrementOutcome, SetOutcome, Shard, ShardConfig};
pub use stats::{
    imbalance, BackpressureSnapshot, Counter, Histogram, HistogramBucket, HistogramSnapshot,
    ShardCounterSnapshot, ShardCounters, ShardStats, StoreCounters, StoreStats, PAYLOAD_BUCKETS,
};
pub use store::{BatchGetOutcome, BatchSetItem, CacheStore, StoreConfig};
pub use ttl_heap::{ExpiryRecord, TtlHeap};
pub use value::{mint_version, Value, ValueKind, ENCODING_BASE64};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 250;

/// Maximum number of items accepted in one batch request
pub const MAX_BATCH_ITEMS: usize = 100;
