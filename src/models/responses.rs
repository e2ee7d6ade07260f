//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::cache::{current_timestamp_ms, CacheEntry, ValueKind};

// == Set ==
/// Response body for `PUT /v1/kv/{key}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetResponse {
    pub key: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

// == Get ==
/// Timestamps and TTL attached to reads with `includeMeta=true`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_remaining_sec: Option<u64>,
}

/// Response body for `GET /v1/kv/{key}` and batch-get hits.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponse {
    pub key: String,
    pub value: JsonValue,
    #[serde(rename = "type")]
    pub value_type: ValueKind,
    pub version: String,
    #[serde(flatten)]
    pub meta: Option<EntryMeta>,
}

impl GetResponse {
    /// Builds the wire view of a read-time snapshot.
    pub fn from_entry(key: String, entry: &CacheEntry, include_meta: bool) -> Self {
        let meta = include_meta.then(|| {
            let now = current_timestamp_ms();
            EntryMeta {
                created_at: entry.created_at,
                updated_at: entry.updated_at,
                expires_at: entry.expires_at,
                ttl_remaining_sec: entry.ttl_remaining_sec(now),
            }
        });
        Self {
            key,
            value: entry.value.to_wire(),
            value_type: entry.kind(),
            version: entry.version.clone(),
            meta,
        }
    }
}

// == Batch Get ==
/// Response body for `POST /v1/kv/batch/get`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchGetResponse {
    pub hits: Vec<GetResponse>,
    pub misses: Vec<String>,
}

// == Batch Set ==
/// Per-item status of a batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchSetStatus {
    Created,
    Updated,
    Error,
}

/// Machine-readable error attached to failed batch items.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemError {
    pub code: &'static str,
    pub message: String,
}

/// One result of `POST /v1/kv/batch/set`, at the same index as its input.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSetResult {
    pub key: String,
    pub status: BatchSetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchItemError>,
}

/// Response body for `POST /v1/kv/batch/set`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSetResponse {
    pub results: Vec<BatchSetResult>,
}

// == Batch Delete ==
/// Per-item status of a batch delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchDeleteStatus {
    Deleted,
    Missing,
    Error,
}

/// One result of `POST /v1/kv/batch/delete`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDeleteResult {
    pub key: String,
    pub status: BatchDeleteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchItemError>,
}

/// Response body for `POST /v1/kv/batch/delete`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDeleteResponse {
    pub results: Vec<BatchDeleteResult>,
}

// == Increment ==
/// Response body for `POST /v1/kv/incr`.
#[derive(Debug, Clone, Serialize)]
pub struct IncrResponse {
    pub key: String,
    pub value: f64,
    pub version: String,
}

// == Health ==
/// Response body for `GET /healthz`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp.
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
