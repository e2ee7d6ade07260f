//! Cache Statistics Module
//!
//! Readable counters, gauges, and a fixed-bucket histogram consumed by the
//! HTTP boundary. Everything here is lock-free so the read fast path and
//! the shard dispatchers can record without coordination; the boundary
//! adapts these values to whatever wire format it serves.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Counter ==
/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increment by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

// == Shard Counters ==
/// Per-shard operation counters.
#[derive(Debug, Default)]
pub struct ShardCounters {
    pub hits: Counter,
    pub misses: Counter,
    pub sets: Counter,
    pub deletes: Counter,
    pub evictions: Counter,
    pub expirations: Counter,
    pub conflicts: Counter,
}

impl ShardCounters {
    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> ShardCounterSnapshot {
        ShardCounterSnapshot {
            hits: self.hits.get(),
            misses: self.misses.get(),
            sets: self.sets.get(),
            deletes: self.deletes.get(),
            evictions: self.evictions.get(),
            expirations: self.expirations.get(),
            conflicts: self.conflicts.get(),
        }
    }
}

/// Serializable counter snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ShardCounterSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub conflicts: u64,
}

impl ShardCounterSnapshot {
    fn accumulate(&mut self, other: &ShardCounterSnapshot) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.sets += other.sets;
        self.deletes += other.deletes;
        self.evictions += other.evictions;
        self.expirations += other.expirations;
        self.conflicts += other.conflicts;
    }
}

// == Histogram ==
/// Upper bounds for the payload-size histogram, in bytes.
pub const PAYLOAD_BUCKETS: &[u64] = &[
    64,
    256,
    1024,
    4096,
    16_384,
    65_536,
    262_144,
    1 << 20,
    4 << 20,
    16 << 20,
    64 << 20,
    256 << 20,
];

/// Fixed-bucket histogram with an implicit +Inf bucket.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [u64],
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: &'static [u64]) -> Self {
        Self {
            bounds,
            buckets: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
        }
    }

    /// Record one observation.
    pub fn observe(&self, value: u64) {
        let idx = self
            .bounds
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
    }

    /// Point-in-time copy with cumulative bucket counts.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut cumulative = 0;
        let mut buckets = Vec::with_capacity(self.bounds.len());
        for (idx, &bound) in self.bounds.iter().enumerate() {
            cumulative += self.buckets[idx].load(Ordering::Relaxed);
            buckets.push(HistogramBucket {
                le: bound,
                count: cumulative,
            });
        }
        HistogramSnapshot {
            buckets,
            count: self.count.load(Ordering::Relaxed),
            sum: self.sum.load(Ordering::Relaxed),
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(PAYLOAD_BUCKETS)
    }
}

/// One cumulative histogram bucket.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HistogramBucket {
    pub le: u64,
    pub count: u64,
}

/// Serializable histogram snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub buckets: Vec<HistogramBucket>,
    pub count: u64,
    pub sum: u64,
}

// == Store Counters ==
/// Store-wide counters maintained outside the shards.
#[derive(Debug, Default)]
pub struct StoreCounters {
    /// Admissions refused by the in-flight cap
    pub backpressure_inflight: Counter,
    /// Admissions refused by a full shard mailbox
    pub backpressure_mailbox: Counter,
    /// Requests with a missing or invalid API token
    pub auth_failures: Counter,
    /// Sizes of accepted write payloads
    pub payload_bytes: Histogram,
}

// == Stats Snapshots ==
/// Per-shard statistics exposed by the façade.
#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub shard: usize,
    pub entries: usize,
    pub bytes: u64,
    pub mailbox_depth: usize,
    #[serde(flatten)]
    pub counters: ShardCounterSnapshot,
}

/// Backpressure totals split by refusal reason.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BackpressureSnapshot {
    pub max_inflight_exceeded: u64,
    pub mailbox_full: u64,
}

/// Aggregated store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub shards: Vec<ShardStats>,
    pub entries: usize,
    pub bytes: u64,
    #[serde(flatten)]
    pub totals: ShardCounterSnapshot,
    pub hit_rate: f64,
    pub imbalance: f64,
    pub in_flight: u64,
    pub backpressure: BackpressureSnapshot,
    pub auth_failures: u64,
    pub payload_bytes: HistogramSnapshot,
}

impl StoreStats {
    /// Builds the aggregate view from per-shard stats and store counters.
    pub fn aggregate(shards: Vec<ShardStats>, in_flight: u64, counters: &StoreCounters) -> Self {
        let mut totals = ShardCounterSnapshot::default();
        let mut entries = 0;
        let mut bytes = 0;
        for shard in &shards {
            totals.accumulate(&shard.counters);
            entries += shard.entries;
            bytes += shard.bytes;
        }

        let lookups = totals.hits + totals.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            totals.hits as f64 / lookups as f64
        };

        let counts: Vec<usize> = shards.iter().map(|s| s.entries).collect();

        Self {
            shards,
            entries,
            bytes,
            totals,
            hit_rate,
            imbalance: imbalance(&counts),
            in_flight,
            backpressure: BackpressureSnapshot {
                max_inflight_exceeded: counters.backpressure_inflight.get(),
                mailbox_full: counters.backpressure_mailbox.get(),
            },
            auth_failures: counters.auth_failures.get(),
            payload_bytes: counters.payload_bytes.snapshot(),
        }
    }
}

// == Imbalance ==
/// Coefficient of variation (sigma over mu) of entry counts across shards.
/// Zero when the mean is zero.
pub fn imbalance(counts: &[usize]) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    let mean = counts.iter().sum::<usize>() as f64 / counts.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = counts
        .iter()
        .map(|&c| (c as f64 - mean).powi(2))
        .sum::<f64>()
        / counts.len() as f64;
    variance.sqrt() / mean
}
