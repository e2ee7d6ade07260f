//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies, with validation
//! helpers applied before anything reaches the engine.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::cache::{MAX_BATCH_ITEMS, MAX_KEY_LENGTH};

// == Validation Helpers ==
/// Validates a cache key: non-empty UTF-8 up to 250 bytes.
///
/// Returns an error message if validation fails, None if valid.
pub fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "key exceeds maximum length of {MAX_KEY_LENGTH} bytes"
        ));
    }
    None
}

/// Validates an optional TTL. Zero is rejected outright rather than
/// inserting an entry that expires immediately.
pub fn validate_ttl(ttl_sec: Option<u64>) -> Option<String> {
    if ttl_sec == Some(0) {
        return Some("ttlSec must be at least 1".to_string());
    }
    None
}

/// Validates a batch item count against the per-request cap.
pub fn validate_batch_len(len: usize) -> Option<String> {
    if len > MAX_BATCH_ITEMS {
        return Some(format!(
            "batch exceeds maximum of {MAX_BATCH_ITEMS} items"
        ));
    }
    None
}

// == Set ==
/// Request body for `PUT /v1/kv/{key}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRequest {
    /// The value to store; type is inferred from the JSON shape
    pub value: JsonValue,
    /// Optional TTL in seconds
    #[serde(default)]
    pub ttl_sec: Option<u64>,
    /// Set to "base64" to store a raw byte payload
    #[serde(default)]
    pub encoding: Option<String>,
}

impl SetRequest {
    /// Validates the request data.
    pub fn validate(&self) -> Option<String> {
        validate_ttl(self.ttl_sec)
    }
}

// == Batch Get ==
/// Request body for `POST /v1/kv/batch/get`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchGetRequest {
    pub keys: Vec<String>,
}

// == Batch Set ==
/// One item of `POST /v1/kv/batch/set`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSetItemRequest {
    pub key: String,
    pub value: JsonValue,
    #[serde(default)]
    pub ttl_sec: Option<u64>,
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Request body for `POST /v1/kv/batch/set`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSetRequest {
    pub items: Vec<BatchSetItemRequest>,
}

// == Batch Delete ==
/// Request body for `POST /v1/kv/batch/delete`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchDeleteRequest {
    pub keys: Vec<String>,
}

// == Increment ==
/// Request body for `POST /v1/kv/incr`. The delta is a signed 32-bit
/// integer on the wire; arithmetic is IEEE-754 double.
#[derive(Debug, Clone, Deserialize)]
pub struct IncrRequest {
    pub key: String,
    pub delta: i32,
}

// == Get Query ==
/// Query parameters for `GET /v1/kv/{key}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetQuery {
    #[serde(default)]
    pub include_meta: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_request_deserialize() {
        let json = r#"{"value": "hello"}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.value, serde_json::json!("hello"));
        assert!(req.ttl_sec.is_none());
        assert!(req.encoding.is_none());
    }

    #[test]
    fn test_set_request_with_ttl_and_encoding() {
        let json = r#"{"value": "aGk=", "ttlSec": 60, "encoding": "base64"}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.ttl_sec, Some(60));
        assert_eq!(req.encoding.as_deref(), Some("base64"));
    }

    #[test]
    fn test_validate_key_bounds() {
        assert!(validate_key("").is_some());
        assert!(validate_key(&"x".repeat(MAX_KEY_LENGTH)).is_none());
        assert!(validate_key(&"x".repeat(MAX_KEY_LENGTH + 1)).is_some());
    }

    #[test]
    fn test_validate_ttl_rejects_zero() {
        assert!(validate_ttl(Some(0)).is_some());
        assert!(validate_ttl(Some(1)).is_none());
        assert!(validate_ttl(None).is_none());
    }

    #[test]
    fn test_validate_batch_len() {
        assert!(validate_batch_len(0).is_none());
        assert!(validate_batch_len(MAX_BATCH_ITEMS).is_none());
        assert!(validate_batch_len(MAX_BATCH_ITEMS + 1).is_some());
    }

    #[test]
    fn test_incr_request_deserialize() {
        let json = r#"{"key": "c", "delta": -3}"#;
        let req: IncrRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.key, "c");
        assert_eq!(req.delta, -3);
    }

    #[test]
    fn test_get_query_defaults() {
        let query: GetQuery = serde_json::from_str("{}").unwrap();
        assert!(!query.include_meta);
    }
}
