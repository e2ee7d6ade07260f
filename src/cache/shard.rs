//! Shard Actor
//!
//! Each shard owns one partition of the keyspace: an entry index, the
//! size-aware LRU, the TTL heap, and a bounded mailbox of pending
//! mutations drained by a single dispatcher task. Reads never traverse
//! the mailbox; they take a short shared lock on the state and forward
//! LRU promotion and lazy expiry through the mailbox as internal
//! commands, so every structural change stays serialized behind the
//! dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::cache::entry::{current_timestamp_ms, CacheEntry};
use crate::cache::lru::SizeAwareLru;
use crate::cache::stats::ShardCounters;
use crate::cache::ttl_heap::TtlHeap;
use crate::cache::value::{mint_version, Value};
use crate::error::{CacheError, Result, REASON_DRAINING, REASON_MAILBOX_FULL};

/// Upper bound on expirations handed to the mailbox per sweeper tick, so a
/// mass expiry cannot monopolize the dispatcher.
const SWEEP_BATCH_MAX: usize = 256;

// == Shard Configuration ==
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub id: usize,
    pub mailbox_capacity: usize,
    pub max_item_bytes: usize,
    pub max_entries: Option<usize>,
    pub max_bytes: Option<u64>,
    pub sweep_interval: Duration,
}

// == Mutation Outcomes ==
/// Result of a successful set.
#[derive(Debug, Clone)]
pub struct SetOutcome {
    pub version: String,
    pub expires_at: Option<u64>,
    /// True when the pre-write state was absent or expired.
    pub created: bool,
}

/// Result of a successful increment.
#[derive(Debug, Clone)]
pub struct IncrementOutcome {
    pub value: f64,
    pub version: String,
}

// == Mailbox Commands ==
enum ShardCommand {
    Set {
        key: String,
        value: Value,
        ttl_sec: Option<u64>,
        if_match: Option<String>,
        if_none_match: bool,
        reply: oneshot::Sender<Result<SetOutcome>>,
    },
    Delete {
        key: String,
        if_match: Option<String>,
        reply: oneshot::Sender<Result<bool>>,
    },
    Increment {
        key: String,
        delta: f64,
        reply: oneshot::Sender<Result<IncrementOutcome>>,
    },
    /// LRU promotion forwarded from the read fast path.
    Touch { key: String },
    /// Lazy or swept expiry; carries the expiry the issuer observed so a
    /// TTL extension in between is detected and the command discarded.
    Expire { key: String, expires_at: u64 },
    /// Marks the end of the drain during shutdown.
    Shutdown { done: oneshot::Sender<()> },
}

// == Shard State ==
struct ShardState {
    entries: HashMap<String, CacheEntry>,
    lru: SizeAwareLru,
    ttl: TtlHeap,
}

// == Shard ==
/// One keyspace partition with its dispatcher and sweeper tasks.
pub struct Shard {
    id: usize,
    state: Arc<RwLock<ShardState>>,
    tx: mpsc::Sender<ShardCommand>,
    counters: Arc<ShardCounters>,
    mailbox_capacity: usize,
    draining: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Shard {
    /// Spawns a shard's dispatcher and sweeper onto the current runtime.
    pub fn spawn(config: ShardConfig) -> Self {
        let state = Arc::new(RwLock::new(ShardState {
            entries: HashMap::new(),
            lru: SizeAwareLru::new(config.max_entries, config.max_bytes),
            ttl: TtlHeap::new(),
        }));
        let counters = Arc::new(ShardCounters::default());
        // tokio channels need a non-zero buffer.
        let mailbox_capacity = config.mailbox_capacity.max(1);
        let (tx, rx) = mpsc::channel(mailbox_capacity);

        tokio::spawn(dispatch_loop(
            config.id,
            Arc::clone(&state),
            Arc::clone(&counters),
            config.max_item_bytes,
            rx,
        ));
        let sweeper = tokio::spawn(sweep_loop(
            config.id,
            Arc::clone(&state),
            tx.clone(),
            config.sweep_interval,
        ));

        Self {
            id: config.id,
            state,
            tx,
            counters,
            mailbox_capacity,
            draining: AtomicBool::new(false),
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Shard index within the store.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Per-shard operation counters.
    pub fn counters(&self) -> &ShardCounters {
        &self.counters
    }

    /// Number of mutations currently queued in the mailbox.
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox_capacity - self.tx.capacity()
    }

    /// Current entry count and tracked bytes.
    pub fn usage(&self) -> (usize, u64) {
        let state = self.state.read();
        (state.entries.len(), state.lru.bytes())
    }

    // == Read Fast Path ==
    /// Looks up a key, returning an immutable snapshot of the live entry.
    ///
    /// Skips the mailbox entirely. Entries past their expiry are treated
    /// as absent the moment wall-clock passes `expires_at`; their removal
    /// is forwarded to the dispatcher so callers never observe them and
    /// the sweeper is not raced.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        enum Lookup {
            Miss,
            Expired(Option<u64>),
            Hit(CacheEntry),
        }

        let now = current_timestamp_ms();
        let lookup = {
            let guard = self.state.read();
            match guard.entries.get(key) {
                None => Lookup::Miss,
                Some(entry) if entry.is_expired_at(now) => Lookup::Expired(entry.expires_at),
                Some(entry) => Lookup::Hit(entry.clone()),
            }
        };

        match lookup {
            Lookup::Miss => {
                self.counters.misses.inc();
                None
            }
            Lookup::Expired(expires_at) => {
                self.counters.misses.inc();
                if let Some(expires_at) = expires_at {
                    // Best-effort: the sweeper picks it up if the mailbox is full.
                    let _ = self.tx.try_send(ShardCommand::Expire {
                        key: key.to_string(),
                        expires_at,
                    });
                }
                None
            }
            Lookup::Hit(snapshot) => {
                self.counters.hits.inc();
                let _ = self.tx.try_send(ShardCommand::Touch {
                    key: key.to_string(),
                });
                Some(snapshot)
            }
        }
    }

    // == Mutation Submission ==
    /// Enqueues a set, returning the reply handle without awaiting it.
    pub fn submit_set(
        &self,
        key: String,
        value: Value,
        ttl_sec: Option<u64>,
        if_match: Option<String>,
        if_none_match: bool,
    ) -> Result<oneshot::Receiver<Result<SetOutcome>>> {
        let (reply, rx) = oneshot::channel();
        self.submit(ShardCommand::Set {
            key,
            value,
            ttl_sec,
            if_match,
            if_none_match,
            reply,
        })?;
        Ok(rx)
    }

    /// Enqueues a delete, returning the reply handle without awaiting it.
    pub fn submit_delete(
        &self,
        key: String,
        if_match: Option<String>,
    ) -> Result<oneshot::Receiver<Result<bool>>> {
        let (reply, rx) = oneshot::channel();
        self.submit(ShardCommand::Delete {
            key,
            if_match,
            reply,
        })?;
        Ok(rx)
    }

    /// Stores a value, waiting for the dispatcher's reply.
    pub async fn set(
        &self,
        key: String,
        value: Value,
        ttl_sec: Option<u64>,
        if_match: Option<String>,
        if_none_match: bool,
    ) -> Result<SetOutcome> {
        let rx = self.submit_set(key, value, ttl_sec, if_match, if_none_match)?;
        await_reply(rx).await
    }

    /// Deletes a key, waiting for the dispatcher's reply. Returns false
    /// when the key was absent or already expired.
    pub async fn delete(&self, key: String, if_match: Option<String>) -> Result<bool> {
        let rx = self.submit_delete(key, if_match)?;
        await_reply(rx).await
    }

    /// Adds `delta` to a numeric key, creating it from zero when absent.
    pub async fn increment(&self, key: String, delta: f64) -> Result<IncrementOutcome> {
        let (reply, rx) = oneshot::channel();
        self.submit(ShardCommand::Increment { key, delta, reply })?;
        await_reply(rx).await
    }

    fn submit(&self, command: ShardCommand) -> Result<()> {
        if self.draining.load(Ordering::Acquire) {
            return Err(CacheError::Overloaded {
                reason: REASON_DRAINING,
            });
        }
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CacheError::Overloaded {
                reason: REASON_MAILBOX_FULL,
            }),
            Err(TrySendError::Closed(_)) => {
                Err(CacheError::Internal("shard mailbox closed".to_string()))
            }
        }
    }

    // == Lifecycle ==
    /// Drains the mailbox and stops the dispatcher. Reads keep working;
    /// new mutations are refused the moment draining begins.
    pub async fn shutdown(&self) {
        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        let (done, rx) = oneshot::channel();
        // `send` (not try_send) so the marker lands even behind a backlog.
        if self.tx.send(ShardCommand::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let state = self.state.read();
        let entry_bytes: u64 = state.entries.values().map(|e| e.size_bytes as u64).sum();
        assert_eq!(state.entries.len(), state.lru.len());
        assert_eq!(entry_bytes, state.lru.bytes());
        let now = current_timestamp_ms();
        for entry in state.entries.values() {
            assert!(entry.created_at <= entry.updated_at);
            if let Some(expires_at) = entry.expires_at.filter(|&e| e > now) {
                // Every live TTL'd entry must still be discoverable by the sweeper.
                assert!(state.ttl.len() > 0, "no heap record for expires_at={expires_at}");
            }
        }
    }
}

async fn await_reply<T>(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    rx.await
        .map_err(|_| CacheError::Internal("shard dispatcher dropped the reply".to_string()))?
}

// == Dispatcher ==
async fn dispatch_loop(
    id: usize,
    state: Arc<RwLock<ShardState>>,
    counters: Arc<ShardCounters>,
    max_item_bytes: usize,
    mut rx: mpsc::Receiver<ShardCommand>,
) {
    debug!(shard = id, "dispatcher started");
    while let Some(command) = rx.recv().await {
        let mut guard = state.write();
        match command {
            ShardCommand::Set {
                key,
                value,
                ttl_sec,
                if_match,
                if_none_match,
                reply,
            } => {
                let result = apply_set(
                    &mut guard,
                    &counters,
                    max_item_bytes,
                    key,
                    value,
                    ttl_sec,
                    if_match,
                    if_none_match,
                );
                // A dropped caller loses the reply; the mutation stays committed.
                let _ = reply.send(result);
            }
            ShardCommand::Delete {
                key,
                if_match,
                reply,
            } => {
                let _ = reply.send(apply_delete(&mut guard, &counters, key, if_match));
            }
            ShardCommand::Increment { key, delta, reply } => {
                let _ = reply.send(apply_increment(&mut guard, &counters, key, delta));
            }
            ShardCommand::Touch { key } => apply_touch(&mut guard, &key),
            ShardCommand::Expire { key, expires_at } => {
                apply_expire(&mut guard, &counters, &key, expires_at)
            }
            ShardCommand::Shutdown { done } => {
                drop(guard);
                let _ = done.send(());
                break;
            }
        }
    }
    debug!(shard = id, "dispatcher stopped");
}

#[allow(clippy::too_many_arguments)]
fn apply_set(
    state: &mut ShardState,
    counters: &ShardCounters,
    max_item_bytes: usize,
    key: String,
    value: Value,
    ttl_sec: Option<u64>,
    if_match: Option<String>,
    if_none_match: bool,
) -> Result<SetOutcome> {
    let now = current_timestamp_ms();

    // An expired entry is absent for CAS purposes even before removal.
    let (created, created_at) = {
        let live = state
            .entries
            .get(&key)
            .filter(|entry| !entry.is_expired_at(now));

        if if_none_match {
            if let Some(existing) = live {
                counters.conflicts.inc();
                return Err(CacheError::Conflict {
                    key,
                    expected: None,
                    actual: Some(existing.version.clone()),
                });
            }
        }
        if let Some(expected) = &if_match {
            match live {
                None => {
                    counters.conflicts.inc();
                    return Err(CacheError::Conflict {
                        key,
                        expected: Some(expected.clone()),
                        actual: None,
                    });
                }
                Some(existing) if existing.version != *expected => {
                    counters.conflicts.inc();
                    return Err(CacheError::Conflict {
                        key,
                        expected: Some(expected.clone()),
                        actual: Some(existing.version.clone()),
                    });
                }
                Some(_) => {}
            }
        }

        match live {
            Some(existing) => (false, Some(existing.created_at)),
            None => (true, None),
        }
    };

    let size = value.size_bytes();
    if size > max_item_bytes {
        return Err(CacheError::PayloadTooLarge(format!(
            "value of {size} bytes exceeds the {max_item_bytes} byte item limit"
        )));
    }

    let entry = CacheEntry::new(value, mint_version(now), now, ttl_sec, created_at);
    let version = entry.version.clone();
    let expires_at = entry.expires_at;

    state.entries.insert(key.clone(), entry);
    for victim in state.lru.put(&key, size) {
        state.entries.remove(&victim);
        counters.evictions.inc();
    }
    // Only schedule expiry if the entry survived its own insertion.
    if let Some(expires_at) = expires_at {
        if state.entries.contains_key(&key) {
            state.ttl.push(key, expires_at);
        }
    }
    counters.sets.inc();

    Ok(SetOutcome {
        version,
        expires_at,
        created,
    })
}

fn apply_delete(
    state: &mut ShardState,
    counters: &ShardCounters,
    key: String,
    if_match: Option<String>,
) -> Result<bool> {
    let now = current_timestamp_ms();

    // Resolve an in-place expired entry first so it reads as absent.
    if state
        .entries
        .get(&key)
        .is_some_and(|entry| entry.is_expired_at(now))
    {
        remove_entry(state, &key);
        counters.expirations.inc();
    }

    let Some(existing) = state.entries.get(&key) else {
        return Ok(false);
    };
    if let Some(expected) = if_match {
        if existing.version != expected {
            counters.conflicts.inc();
            return Err(CacheError::Conflict {
                actual: Some(existing.version.clone()),
                expected: Some(expected),
                key,
            });
        }
    }
    remove_entry(state, &key);
    counters.deletes.inc();
    Ok(true)
}

fn apply_increment(
    state: &mut ShardState,
    counters: &ShardCounters,
    key: String,
    delta: f64,
) -> Result<IncrementOutcome> {
    let now = current_timestamp_ms();

    let (base, created_at, expires_at) = {
        let live = state
            .entries
            .get(&key)
            .filter(|entry| !entry.is_expired_at(now));
        match live {
            Some(existing) => match existing.value.as_number() {
                Some(n) => (n, Some(existing.created_at), existing.expires_at),
                None => {
                    return Err(CacheError::BadRequest(format!(
                        "cannot increment key '{key}': stored value is not a number"
                    )))
                }
            },
            None => (0.0, None, None),
        }
    };

    let value = base + delta;
    if !value.is_finite() {
        return Err(CacheError::BadRequest(
            "increment overflows the representable numeric range".to_string(),
        ));
    }

    // A fresh number entry: new version and updated_at, preserved
    // created_at and expiry. The existing heap record stays valid because
    // expires_at is unchanged.
    let entry = CacheEntry {
        value: Value::Number(value),
        version: mint_version(now),
        created_at: created_at.unwrap_or(now),
        updated_at: now,
        expires_at,
        size_bytes: 8,
    };
    let version = entry.version.clone();

    state.entries.insert(key.clone(), entry);
    for victim in state.lru.put(&key, 8) {
        state.entries.remove(&victim);
        counters.evictions.inc();
    }
    counters.sets.inc();

    Ok(IncrementOutcome { value, version })
}

fn apply_touch(state: &mut ShardState, key: &str) {
    let now = current_timestamp_ms();
    if state
        .entries
        .get(key)
        .is_some_and(|entry| !entry.is_expired_at(now))
    {
        state.lru.touch(key);
    }
}

fn apply_expire(state: &mut ShardState, counters: &ShardCounters, key: &str, expires_at: u64) {
    let now = current_timestamp_ms();
    // Discard if the entry was overwritten, deleted, or its TTL extended
    // since the command was issued.
    let still_expired = state
        .entries
        .get(key)
        .is_some_and(|entry| entry.expires_at == Some(expires_at) && entry.is_expired_at(now));
    if still_expired {
        remove_entry(state, key);
        counters.expirations.inc();
    }
}

fn remove_entry(state: &mut ShardState, key: &str) {
    state.entries.remove(key);
    state.lru.remove(key);
}

// == Sweeper ==
async fn sweep_loop(
    id: usize,
    state: Arc<RwLock<ShardState>>,
    tx: mpsc::Sender<ShardCommand>,
    interval: Duration,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let now = current_timestamp_ms();
        let due = { state.write().ttl.pop_expired(now, SWEEP_BATCH_MAX) };
        if due.is_empty() {
            continue;
        }
        debug!(shard = id, count = due.len(), "sweeping expired records");
        for record in due {
            // Stale records (overwritten, deleted, or TTL-extended entries)
            // are discarded here without touching the mailbox.
            let still_expired = {
                let guard = state.read();
                guard.entries.get(&record.key).is_some_and(|entry| {
                    entry.expires_at == Some(record.expires_at) && entry.is_expired_at(now)
                })
            };
            if !still_expired {
                continue;
            }
            match tx.try_send(ShardCommand::Expire {
                key: record.key,
                expires_at: record.expires_at,
            }) {
                Ok(()) => {}
                Err(TrySendError::Full(command)) => {
                    // Mailbox saturated: put the record back for the next tick.
                    if let ShardCommand::Expire { key, expires_at } = command {
                        state.write().ttl.push(key, expires_at);
                    }
                    break;
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::sleep;

    fn test_shard() -> Shard {
        Shard::spawn(ShardConfig {
            id: 0,
            mailbox_capacity: 64,
            max_item_bytes: 1024,
            max_entries: None,
            max_bytes: None,
            sweep_interval: Duration::from_millis(100),
        })
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let shard = test_shard();

        let outcome = shard
            .set("k".into(), text("v"), None, None, false)
            .await
            .unwrap();
        assert!(outcome.created);
        assert!(outcome.expires_at.is_none());

        let entry = shard.get("k").unwrap();
        assert_eq!(entry.value, text("v"));
        assert_eq!(entry.version, outcome.version);
        shard.assert_invariants();
    }

    #[tokio::test]
    async fn test_overwrite_mints_new_version() {
        let shard = test_shard();

        let first = shard
            .set("k".into(), text("a"), None, None, false)
            .await
            .unwrap();
        let second = shard
            .set("k".into(), text("b"), None, None, false)
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_ne!(first.version, second.version);

        let entry = shard.get("k").unwrap();
        assert_eq!(entry.value, text("b"));
    }

    #[tokio::test]
    async fn test_create_only_conflicts_when_present() {
        let shard = test_shard();

        shard
            .set("k".into(), text("a"), None, None, true)
            .await
            .unwrap();
        let err = shard
            .set("k".into(), text("b"), None, None, true)
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Conflict { .. }));
        assert_eq!(shard.counters().conflicts.get(), 1);
        // Original value survives the refused write.
        assert_eq!(shard.get("k").unwrap().value, text("a"));
    }

    #[tokio::test]
    async fn test_if_match_success_and_staleness() {
        let shard = test_shard();

        let v1 = shard
            .set("k".into(), text("a"), None, None, false)
            .await
            .unwrap()
            .version;
        let v2 = shard
            .set("k".into(), text("b"), None, Some(v1.clone()), false)
            .await
            .unwrap()
            .version;
        assert_ne!(v1, v2);

        // Replaying the old precondition must fail with both versions.
        let err = shard
            .set("k".into(), text("c"), None, Some(v1.clone()), false)
            .await
            .unwrap_err();
        match err {
            CacheError::Conflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, Some(v1));
                assert_eq!(actual, Some(v2));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_if_match_on_absent_key_conflicts() {
        let shard = test_shard();

        let err = shard
            .set("k".into(), text("a"), None, Some("v0".into()), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Conflict { actual: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_for_cas() {
        let shard = test_shard();

        shard
            .set("k".into(), text("a"), Some(1), None, false)
            .await
            .unwrap();
        sleep(Duration::from_millis(1100)).await;

        // Create-only succeeds because the old entry is expired.
        let outcome = shard
            .set("k".into(), text("b"), None, None, true)
            .await
            .unwrap();
        assert!(outcome.created);
    }

    #[tokio::test]
    async fn test_payload_too_large_rejected() {
        let shard = test_shard();

        let err = shard
            .set("k".into(), text(&"x".repeat(1025)), None, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::PayloadTooLarge(_)));
        assert!(shard.get("k").is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let shard = test_shard();

        shard
            .set("k".into(), text("v"), None, None, false)
            .await
            .unwrap();
        assert!(shard.delete("k".into(), None).await.unwrap());
        assert!(!shard.delete("k".into(), None).await.unwrap());
        assert_eq!(shard.counters().deletes.get(), 1);
        shard.assert_invariants();
    }

    #[tokio::test]
    async fn test_delete_with_stale_if_match_conflicts() {
        let shard = test_shard();

        shard
            .set("k".into(), text("v"), None, None, false)
            .await
            .unwrap();
        let err = shard
            .delete("k".into(), Some("wrong".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Conflict { .. }));
        assert!(shard.get("k").is_some());
    }

    #[tokio::test]
    async fn test_increment_from_absent_and_existing() {
        let shard = test_shard();

        let first = shard.increment("c".into(), 5.0).await.unwrap();
        assert_eq!(first.value, 5.0);
        let second = shard.increment("c".into(), -2.0).await.unwrap();
        assert_eq!(second.value, 3.0);
        assert_ne!(first.version, second.version);

        let entry = shard.get("c").unwrap();
        assert_eq!(entry.value.as_number(), Some(3.0));
        assert_eq!(entry.size_bytes, 8);
    }

    #[tokio::test]
    async fn test_increment_on_non_number_rejected() {
        let shard = test_shard();

        shard
            .set("s".into(), text("hello"), None, None, false)
            .await
            .unwrap();
        let err = shard.increment("s".into(), 1.0).await.unwrap_err();
        assert!(matches!(err, CacheError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_increment_preserves_created_at() {
        let shard = test_shard();

        shard.increment("c".into(), 1.0).await.unwrap();
        let created_at = shard.get("c").unwrap().created_at;
        sleep(Duration::from_millis(20)).await;
        shard.increment("c".into(), 1.0).await.unwrap();

        let entry = shard.get("c").unwrap();
        assert_eq!(entry.created_at, created_at);
        assert!(entry.updated_at >= created_at);
    }

    #[tokio::test]
    async fn test_lazy_expiry_on_read() {
        let shard = test_shard();

        shard
            .set("t".into(), text("x"), Some(1), None, false)
            .await
            .unwrap();
        assert!(shard.get("t").is_some());

        sleep(Duration::from_millis(1100)).await;
        // Expired for readers immediately, whether or not the sweeper ran.
        assert!(shard.get("t").is_none());

        // Give the expiry command time to commit, then check the counter.
        sleep(Duration::from_millis(200)).await;
        assert_eq!(shard.counters().expirations.get(), 1);
        assert_eq!(shard.usage().0, 0);
        shard.assert_invariants();
    }

    #[tokio::test]
    async fn test_sweeper_removes_unread_entries() {
        let shard = test_shard();

        shard
            .set("t".into(), text("x"), Some(1), None, false)
            .await
            .unwrap();
        // No reads at all; the sweeper alone must collect the entry.
        sleep(Duration::from_millis(1400)).await;

        assert_eq!(shard.usage().0, 0);
        assert_eq!(shard.counters().expirations.get(), 1);
    }

    #[tokio::test]
    async fn test_ttl_extension_discards_stale_heap_record() {
        let shard = test_shard();

        shard
            .set("t".into(), text("x"), Some(1), None, false)
            .await
            .unwrap();
        // Extend the TTL before the first record comes due.
        shard
            .set("t".into(), text("x"), Some(30), None, false)
            .await
            .unwrap();

        sleep(Duration::from_millis(1400)).await;
        // The stale record must not have taken the live entry with it.
        assert!(shard.get("t").is_some());
        assert_eq!(shard.counters().expirations.get(), 0);
    }

    #[tokio::test]
    async fn test_byte_budget_evicts_oldest() {
        let shard = Shard::spawn(ShardConfig {
            id: 0,
            mailbox_capacity: 64,
            max_item_bytes: 1024,
            max_entries: None,
            max_bytes: Some(250),
            sweep_interval: Duration::from_secs(60),
        });

        for key in ["a", "b", "c"] {
            shard
                .set(key.into(), text(&"x".repeat(100)), None, None, false)
                .await
                .unwrap();
        }

        assert!(shard.get("a").is_none());
        assert!(shard.get("b").is_some());
        assert!(shard.get("c").is_some());
        assert_eq!(shard.counters().evictions.get(), 1);
        shard.assert_invariants();
    }

    #[tokio::test]
    async fn test_read_promotes_against_eviction() {
        let shard = Shard::spawn(ShardConfig {
            id: 0,
            mailbox_capacity: 64,
            max_item_bytes: 1024,
            max_entries: Some(3),
            max_bytes: None,
            sweep_interval: Duration::from_secs(60),
        });

        for key in ["a", "b", "c"] {
            shard
                .set(key.into(), text("v"), None, None, false)
                .await
                .unwrap();
        }
        // The Touch lands in the mailbox before the next set, so ordering
        // is guaranteed by FIFO.
        let _ = shard.get("a");
        shard
            .set("d".into(), text("v"), None, None, false)
            .await
            .unwrap();

        assert!(shard.get("a").is_some());
        assert!(shard.get("b").is_none());
    }

    #[tokio::test]
    async fn test_json_value_through_shard() {
        let shard = test_shard();

        let value = Value::from_wire(json!({"a": [1, 2]}), None).unwrap();
        let size = value.size_bytes();
        shard
            .set("j".into(), value.clone(), None, None, false)
            .await
            .unwrap();

        let entry = shard.get("j").unwrap();
        assert_eq!(entry.value, value);
        assert_eq!(entry.size_bytes, size);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_mutations() {
        let shard = test_shard();

        shard
            .set("k".into(), text("v"), None, None, false)
            .await
            .unwrap();
        shard.shutdown().await;

        let err = shard
            .set("k2".into(), text("v"), None, None, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Overloaded {
                reason: REASON_DRAINING
            }
        ));
        // Reads still served while stopped.
        assert!(shard.get("k").is_some());
    }
}
