//! Cache Store Façade
//!
//! Routes keys to their owning shards, enforces the store-wide in-flight
//! admission cap, orchestrates batch fan-out with order-preserving
//! results, aggregates statistics, and drives shard lifecycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::hasher::shard_of;
use crate::cache::shard::{IncrementOutcome, SetOutcome, Shard, ShardConfig};
use crate::cache::stats::{ShardStats, StoreCounters, StoreStats};
use crate::cache::value::Value;
use crate::cache::CacheEntry;
use crate::config::Config;
use crate::error::{CacheError, Result, REASON_MAILBOX_FULL, REASON_MAX_INFLIGHT};

// == Store Configuration ==
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of shards the keyspace is partitioned into
    pub shards: usize,
    /// Store-wide cap on concurrently admitted requests
    pub max_inflight: usize,
    /// Per-shard mailbox capacity
    pub max_shard_mailbox: usize,
    /// Per-entry size ceiling
    pub max_item_bytes: usize,
    /// Optional total byte budget, divided equally across shards
    pub memory_budget_bytes: Option<u64>,
    /// Optional per-shard entry cap
    pub max_entries_per_shard: Option<usize>,
    /// Sweeper tick
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shards: num_cpus::get().max(1),
            max_inflight: 1024,
            max_shard_mailbox: 1024,
            max_item_bytes: crate::config::DEFAULT_MAX_ITEM_BYTES,
            memory_budget_bytes: None,
            max_entries_per_shard: None,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for StoreConfig {
    fn from(config: &Config) -> Self {
        Self {
            shards: config.shards,
            max_inflight: config.max_inflight,
            max_shard_mailbox: config.max_shard_mailbox,
            max_item_bytes: config.max_item_bytes,
            memory_budget_bytes: config.memory_budget_bytes,
            max_entries_per_shard: None,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

// == Batch Types ==
/// One item of a batch write, already validated and typed at the boundary.
#[derive(Debug)]
pub struct BatchSetItem {
    pub key: String,
    pub value: Value,
    pub ttl_sec: Option<u64>,
}

/// Outcome of a batch read; no ordering guarantees within the lists.
#[derive(Debug, Default)]
pub struct BatchGetOutcome {
    pub hits: Vec<(String, CacheEntry)>,
    pub misses: Vec<String>,
}

// == Cache Store ==
/// Sharded cache store with size-aware eviction and TTL expiration.
pub struct CacheStore {
    shards: Vec<Shard>,
    counters: Arc<StoreCounters>,
    in_flight: AtomicU64,
    max_inflight: u64,
    draining: AtomicBool,
}

impl CacheStore {
    // == Constructor ==
    /// Spawns all shards onto the current runtime.
    ///
    /// A configured memory budget is split equally across shards to set
    /// each LRU's byte cap; without one, eviction by bytes is disabled.
    pub fn new(config: StoreConfig) -> Self {
        let per_shard_bytes = config
            .memory_budget_bytes
            .map(|budget| budget / config.shards as u64);

        let shards = (0..config.shards)
            .map(|id| {
                Shard::spawn(ShardConfig {
                    id,
                    mailbox_capacity: config.max_shard_mailbox,
                    max_item_bytes: config.max_item_bytes,
                    max_entries: config.max_entries_per_shard,
                    max_bytes: per_shard_bytes,
                    sweep_interval: config.sweep_interval,
                })
            })
            .collect();

        Self {
            shards,
            counters: Arc::new(StoreCounters::default()),
            in_flight: AtomicU64::new(0),
            max_inflight: config.max_inflight as u64,
            draining: AtomicBool::new(false),
        }
    }

    /// Store-wide counters shared with the boundary.
    pub fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    /// True once shutdown has begun.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    fn shard_for(&self, key: &str) -> &Shard {
        &self.shards[shard_of(key, self.shards.len())]
    }

    // == Admission ==
    fn admit(&self) -> Result<InflightGuard<'_>> {
        if self.in_flight.fetch_add(1, Ordering::AcqRel) >= self.max_inflight {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            self.counters.backpressure_inflight.inc();
            return Err(CacheError::Overloaded {
                reason: REASON_MAX_INFLIGHT,
            });
        }
        Ok(InflightGuard { store: self })
    }

    fn note_backpressure(&self, error: &CacheError) {
        if matches!(
            error,
            CacheError::Overloaded {
                reason: REASON_MAILBOX_FULL
            }
        ) {
            self.counters.backpressure_mailbox.inc();
        }
    }

    // == Get ==
    /// Reads a key through the owning shard's fast path.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let _guard = self.admit()?;
        Ok(self.shard_for(key).get(key))
    }

    // == Set ==
    /// Stores a value with optional TTL and CAS preconditions.
    pub async fn set(
        &self,
        key: String,
        value: Value,
        ttl_sec: Option<u64>,
        if_match: Option<String>,
        if_none_match: bool,
    ) -> Result<SetOutcome> {
        let _guard = self.admit()?;
        self.counters.payload_bytes.observe(value.size_bytes() as u64);
        let result = self
            .shard_for(&key)
            .set(key, value, ttl_sec, if_match, if_none_match)
            .await;
        if let Err(error) = &result {
            self.note_backpressure(error);
        }
        result
    }

    // == Delete ==
    /// Deletes a key; false when absent or expired.
    pub async fn delete(&self, key: String, if_match: Option<String>) -> Result<bool> {
        let _guard = self.admit()?;
        let result = self.shard_for(&key).delete(key, if_match).await;
        if let Err(error) = &result {
            self.note_backpressure(error);
        }
        result
    }

    // == Increment ==
    /// Adds `delta` to a numeric key, creating it from zero when absent.
    pub async fn increment(&self, key: String, delta: f64) -> Result<IncrementOutcome> {
        let _guard = self.admit()?;
        let result = self.shard_for(&key).increment(key, delta).await;
        if let Err(error) = &result {
            self.note_backpressure(error);
        }
        result
    }

    // == Batch Get ==
    /// Reads many keys, grouped by owning shard. One admission slot
    /// regardless of fan-out.
    pub fn batch_get(&self, keys: &[String]) -> Result<BatchGetOutcome> {
        let _guard = self.admit()?;

        let mut by_shard: Vec<Vec<&String>> = vec![Vec::new(); self.shards.len()];
        for key in keys {
            by_shard[shard_of(key, self.shards.len())].push(key);
        }

        let mut outcome = BatchGetOutcome::default();
        for (idx, group) in by_shard.iter().enumerate() {
            for key in group {
                match self.shards[idx].get(key.as_str()) {
                    Some(entry) => outcome.hits.push(((*key).clone(), entry)),
                    None => outcome.misses.push((*key).clone()),
                }
            }
        }
        Ok(outcome)
    }

    // == Batch Set ==
    /// Writes many items: every item is enqueued on its shard first, then
    /// the replies are collected, so the result vector always matches the
    /// input order. Per-item failures do not abort the batch.
    pub async fn batch_set(
        &self,
        items: Vec<BatchSetItem>,
    ) -> Result<Vec<(String, Result<SetOutcome>)>> {
        let _guard = self.admit()?;

        let mut pending = Vec::with_capacity(items.len());
        for item in items {
            self.counters
                .payload_bytes
                .observe(item.value.size_bytes() as u64);
            let submitted = self.shard_for(&item.key).submit_set(
                item.key.clone(),
                item.value,
                item.ttl_sec,
                None,
                false,
            );
            pending.push((item.key, submitted));
        }

        let mut results = Vec::with_capacity(pending.len());
        for (key, submitted) in pending {
            let outcome = match submitted {
                Ok(rx) => match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(CacheError::Internal(
                        "shard dispatcher dropped the reply".to_string(),
                    )),
                },
                Err(error) => {
                    self.note_backpressure(&error);
                    Err(error)
                }
            };
            results.push((key, outcome));
        }
        Ok(results)
    }

    // == Batch Delete ==
    /// Deletes many keys with the same fan-out and ordering contract as
    /// [`CacheStore::batch_set`].
    pub async fn batch_delete(
        &self,
        keys: Vec<String>,
    ) -> Result<Vec<(String, Result<bool>)>> {
        let _guard = self.admit()?;

        let mut pending = Vec::with_capacity(keys.len());
        for key in keys {
            let submitted = self.shard_for(&key).submit_delete(key.clone(), None);
            pending.push((key, submitted));
        }

        let mut results = Vec::with_capacity(pending.len());
        for (key, submitted) in pending {
            let outcome = match submitted {
                Ok(rx) => match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(CacheError::Internal(
                        "shard dispatcher dropped the reply".to_string(),
                    )),
                },
                Err(error) => {
                    self.note_backpressure(&error);
                    Err(error)
                }
            };
            results.push((key, outcome));
        }
        Ok(results)
    }

    // == Stats ==
    /// Aggregated statistics. Served without an admission slot so probes
    /// keep working under overload.
    pub fn stats(&self) -> StoreStats {
        let shards = self
            .shards
            .iter()
            .map(|shard| {
                let (entries, bytes) = shard.usage();
                ShardStats {
                    shard: shard.id(),
                    entries,
                    bytes,
                    mailbox_depth: shard.mailbox_depth(),
                    counters: shard.counters().snapshot(),
                }
            })
            .collect();

        StoreStats::aggregate(
            shards,
            self.in_flight.load(Ordering::Acquire),
            &self.counters,
        )
    }

    // == Lifecycle ==
    /// Drains every shard: reads keep working, queued mutations commit,
    /// new admissions are refused.
    pub async fn shutdown(&self) {
        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(shards = self.shards.len(), "draining cache store");
        for shard in &self.shards {
            shard.shutdown().await;
        }
        info!("cache store drained");
    }
}

// == In-flight Guard ==
/// Holds one admission slot; released on drop, including early returns
/// and dropped futures.
struct InflightGuard<'a> {
    store: &'a CacheStore,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.store.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(shards: usize) -> CacheStore {
        CacheStore::new(StoreConfig {
            shards,
            max_inflight: 64,
            max_shard_mailbox: 64,
            max_item_bytes: 4096,
            memory_budget_bytes: None,
            max_entries_per_shard: None,
            sweep_interval: Duration::from_secs(60),
        })
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[tokio::test]
    async fn test_set_routes_to_consistent_shard() {
        let store = test_store(4);

        store
            .set("k".into(), text("v"), None, None, false)
            .await
            .unwrap();
        let entry = store.get("k").unwrap().unwrap();
        assert_eq!(entry.value, text("v"));
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let store = test_store(4);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inflight_cap_refuses_all_calls() {
        let store = CacheStore::new(StoreConfig {
            max_inflight: 0,
            ..StoreConfig::default()
        });

        let err = store.get("k").unwrap_err();
        assert!(matches!(
            err,
            CacheError::Overloaded {
                reason: REASON_MAX_INFLIGHT
            }
        ));
        assert_eq!(store.counters().backpressure_inflight.get(), 1);

        let err = store
            .set("k".into(), text("v"), None, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Overloaded { .. }));
    }

    #[tokio::test]
    async fn test_inflight_slot_released_after_call() {
        let store = CacheStore::new(StoreConfig {
            max_inflight: 1,
            ..StoreConfig::default()
        });

        // Sequential calls each get the single slot.
        for i in 0..5 {
            store
                .set(format!("k{i}"), text("v"), None, None, false)
                .await
                .unwrap();
        }
        assert_eq!(store.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_batch_get_partitions_hits_and_misses() {
        let store = test_store(4);

        store
            .set("a".into(), text("1"), None, None, false)
            .await
            .unwrap();
        store
            .set("b".into(), text("2"), None, None, false)
            .await
            .unwrap();

        let keys = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        let outcome = store.batch_get(&keys).unwrap();

        assert_eq!(outcome.hits.len(), 2);
        assert_eq!(outcome.misses, vec!["missing".to_string()]);
    }

    #[tokio::test]
    async fn test_batch_set_preserves_input_order() {
        let store = test_store(4);

        let items: Vec<BatchSetItem> = (0..20)
            .map(|i| BatchSetItem {
                key: format!("key-{i}"),
                value: text("v"),
                ttl_sec: None,
            })
            .collect();
        let results = store.batch_set(items).await.unwrap();

        assert_eq!(results.len(), 20);
        for (i, (key, outcome)) in results.iter().enumerate() {
            assert_eq!(key, &format!("key-{i}"));
            assert!(outcome.as_ref().unwrap().created);
        }
    }

    #[tokio::test]
    async fn test_batch_set_reports_created_vs_updated() {
        let store = test_store(2);

        store
            .set("existing".into(), text("old"), None, None, false)
            .await
            .unwrap();

        let items = vec![
            BatchSetItem {
                key: "existing".into(),
                value: text("new"),
                ttl_sec: None,
            },
            BatchSetItem {
                key: "fresh".into(),
                value: text("v"),
                ttl_sec: None,
            },
        ];
        let results = store.batch_set(items).await.unwrap();

        assert!(!results[0].1.as_ref().unwrap().created);
        assert!(results[1].1.as_ref().unwrap().created);
    }

    #[tokio::test]
    async fn test_batch_delete_preserves_input_order() {
        let store = test_store(4);

        store
            .set("a".into(), text("1"), None, None, false)
            .await
            .unwrap();

        let keys = vec!["a".to_string(), "missing".to_string()];
        let results = store.batch_delete(keys).await.unwrap();

        assert_eq!(results[0].0, "a");
        assert!(results[0].1.as_ref().unwrap());
        assert_eq!(results[1].0, "missing");
        assert!(!results[1].1.as_ref().unwrap());
    }

    #[tokio::test]
    async fn test_empty_batches() {
        let store = test_store(2);

        assert!(store.batch_get(&[]).unwrap().hits.is_empty());
        assert!(store.batch_set(Vec::new()).await.unwrap().is_empty());
        assert!(store.batch_delete(Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_aggregation_and_imbalance() {
        let store = test_store(2);

        for i in 0..10 {
            store
                .set(format!("k{i}"), text("v"), None, None, false)
                .await
                .unwrap();
        }
        let _ = store.get("k0");

        let stats = store.stats();
        assert_eq!(stats.entries, 10);
        assert_eq!(stats.totals.sets, 10);
        assert_eq!(stats.shards.len(), 2);
        assert!(stats.imbalance >= 0.0);
        assert!(stats.hit_rate > 0.0);
    }

    #[tokio::test]
    async fn test_memory_budget_divided_across_shards() {
        let store = CacheStore::new(StoreConfig {
            shards: 1,
            memory_budget_bytes: Some(1024),
            sweep_interval: Duration::from_secs(60),
            ..StoreConfig::default()
        });

        for i in 0..20 {
            store
                .set(
                    format!("k{i:02}"),
                    text(&"x".repeat(100)),
                    None,
                    None,
                    false,
                )
                .await
                .unwrap();
        }

        let stats = store.stats();
        assert!(stats.entries <= 10, "entries={}", stats.entries);
        assert!(stats.totals.evictions >= 10);
        assert!(stats.bytes <= 1024);
        // Least-recently-set keys are the ones missing.
        assert!(store.get("k00").unwrap().is_none());
        assert!(store.get("k19").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_refuses() {
        let store = test_store(2);

        store
            .set("k".into(), text("v"), None, None, false)
            .await
            .unwrap();
        store.shutdown().await;

        assert!(store.is_draining());
        assert!(store
            .set("k2".into(), text("v"), None, None, false)
            .await
            .is_err());
        // Reads still served from drained shards.
        assert!(store.get("k").unwrap().is_some());
    }
}
