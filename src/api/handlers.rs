//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint. The handlers
//! validate and type the wire payloads, call into the engine, and map
//! outcomes to status codes; the engine itself never sees HTTP.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::cache::{BatchSetItem, CacheStore, StoreConfig, StoreStats, Value};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    validate_batch_len, validate_key, validate_ttl, BatchDeleteRequest, BatchDeleteResponse,
    BatchDeleteResult, BatchDeleteStatus, BatchGetRequest, BatchGetResponse, BatchItemError,
    BatchSetRequest, BatchSetResponse, BatchSetResult, BatchSetStatus, GetQuery, GetResponse,
    HealthResponse, IncrRequest, IncrResponse, SetRequest, SetResponse,
};

// Headroom on top of the item ceiling for JSON framing and batch envelopes.
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The sharded cache engine
    pub cache: Arc<CacheStore>,
    /// Shared secret expected in `X-API-Token`
    pub api_token: Arc<str>,
    /// Whether read endpoints also require the token
    pub read_requires_auth: bool,
    /// Boundary-enforced request timeout
    pub request_timeout_ms: u64,
    /// Request body size cap
    pub max_body_bytes: usize,
}

impl AppState {
    /// Creates a new AppState around an existing store.
    pub fn new(cache: Arc<CacheStore>, config: &Config) -> Self {
        Self {
            cache,
            api_token: Arc::from(config.api_token.as_str()),
            read_requires_auth: config.read_requires_auth,
            request_timeout_ms: config.request_timeout_ms,
            max_body_bytes: config.max_item_bytes.saturating_add(BODY_LIMIT_SLACK),
        }
    }

    /// Creates a new AppState from configuration, spawning the store.
    pub fn from_config(config: &Config) -> Self {
        let cache = Arc::new(CacheStore::new(StoreConfig::from(config)));
        Self::new(cache, config)
    }
}

// == CAS Precondition Headers ==
/// Extracts `If-Match` / `If-None-Match` preconditions. `If-None-Match`
/// only supports the create-only wildcard form.
fn cas_preconditions(headers: &HeaderMap) -> Result<(Option<String>, bool)> {
    let if_none_match = match headers.get(header::IF_NONE_MATCH) {
        None => false,
        Some(value) => match value.to_str() {
            Ok("*") => true,
            _ => {
                return Err(CacheError::BadRequest(
                    "If-None-Match only supports '*'".to_string(),
                ))
            }
        },
    };

    let if_match = match headers.get(header::IF_MATCH) {
        None => None,
        Some(value) => {
            let raw = value.to_str().map_err(|_| {
                CacheError::BadRequest("If-Match must be visible ASCII".to_string())
            })?;
            Some(raw.trim_matches('"').to_string())
        }
    };

    if if_none_match && if_match.is_some() {
        return Err(CacheError::BadRequest(
            "If-Match and If-None-Match are mutually exclusive".to_string(),
        ));
    }
    Ok((if_match, if_none_match))
}

// == Key-Value Handlers ==
/// Handler for `PUT /v1/kv/{key}`.
///
/// Returns 201 when the pre-write state was absent or expired, 200 on an
/// update of a live entry.
pub async fn put_kv_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SetRequest>,
) -> Result<Response> {
    if let Some(message) = validate_key(&key).or_else(|| req.validate()) {
        return Err(CacheError::BadRequest(message));
    }
    let (if_match, if_none_match) = cas_preconditions(&headers)?;
    let value = Value::from_wire(req.value, req.encoding.as_deref())?;

    let outcome = state
        .cache
        .set(key.clone(), value, req.ttl_sec, if_match, if_none_match)
        .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let body = SetResponse {
        key,
        version: outcome.version,
        expires_at: outcome.expires_at,
    };
    Ok((status, Json(body)).into_response())
}

/// Handler for `GET /v1/kv/{key}`.
pub async fn get_kv_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<Json<GetResponse>> {
    if let Some(message) = validate_key(&key) {
        return Err(CacheError::BadRequest(message));
    }
    match state.cache.get(&key)? {
        Some(entry) => Ok(Json(GetResponse::from_entry(
            key,
            &entry,
            query.include_meta,
        ))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for `DELETE /v1/kv/{key}`.
pub async fn delete_kv_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    if let Some(message) = validate_key(&key) {
        return Err(CacheError::BadRequest(message));
    }
    let (if_match, _) = cas_preconditions(&headers)?;

    if state.cache.delete(key.clone(), if_match).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(CacheError::NotFound(key))
    }
}

// == Batch Handlers ==
/// Handler for `POST /v1/kv/batch/get`.
pub async fn batch_get_handler(
    State(state): State<AppState>,
    Json(req): Json<BatchGetRequest>,
) -> Result<Json<BatchGetResponse>> {
    if let Some(message) = validate_batch_len(req.keys.len()) {
        return Err(CacheError::BadRequest(message));
    }

    let outcome = state.cache.batch_get(&req.keys)?;
    let hits = outcome
        .hits
        .into_iter()
        .map(|(key, entry)| GetResponse::from_entry(key, &entry, false))
        .collect();
    Ok(Json(BatchGetResponse {
        hits,
        misses: outcome.misses,
    }))
}

/// Handler for `POST /v1/kv/batch/set`.
///
/// Items that fail boundary validation become `error` results in place;
/// the rest fan out to their shards. Results always line up with the
/// input order.
pub async fn batch_set_handler(
    State(state): State<AppState>,
    Json(req): Json<BatchSetRequest>,
) -> Result<Json<BatchSetResponse>> {
    if let Some(message) = validate_batch_len(req.items.len()) {
        return Err(CacheError::BadRequest(message));
    }

    let mut slots: Vec<Option<BatchSetResult>> =
        std::iter::repeat_with(|| None).take(req.items.len()).collect();
    let mut engine_items = Vec::new();
    let mut engine_slots = Vec::new();

    for (idx, item) in req.items.into_iter().enumerate() {
        let invalid = validate_key(&item.key).or_else(|| validate_ttl(item.ttl_sec));
        if let Some(message) = invalid {
            slots[idx] = Some(set_error_result(item.key, &CacheError::BadRequest(message)));
            continue;
        }
        match Value::from_wire(item.value, item.encoding.as_deref()) {
            Ok(value) => {
                engine_items.push(BatchSetItem {
                    key: item.key,
                    value,
                    ttl_sec: item.ttl_sec,
                });
                engine_slots.push(idx);
            }
            Err(error) => slots[idx] = Some(set_error_result(item.key, &error)),
        }
    }

    let results = state.cache.batch_set(engine_items).await?;
    for (slot, (key, outcome)) in engine_slots.into_iter().zip(results) {
        slots[slot] = Some(match outcome {
            Ok(outcome) => BatchSetResult {
                key,
                status: if outcome.created {
                    BatchSetStatus::Created
                } else {
                    BatchSetStatus::Updated
                },
                version: Some(outcome.version),
                error: None,
            },
            Err(error) => set_error_result(key, &error),
        });
    }

    Ok(Json(BatchSetResponse {
        results: slots.into_iter().flatten().collect(),
    }))
}

/// Handler for `POST /v1/kv/batch/delete`.
pub async fn batch_delete_handler(
    State(state): State<AppState>,
    Json(req): Json<BatchDeleteRequest>,
) -> Result<Json<BatchDeleteResponse>> {
    if let Some(message) = validate_batch_len(req.keys.len()) {
        return Err(CacheError::BadRequest(message));
    }

    let mut slots: Vec<Option<BatchDeleteResult>> =
        std::iter::repeat_with(|| None).take(req.keys.len()).collect();
    let mut engine_keys = Vec::new();
    let mut engine_slots = Vec::new();

    for (idx, key) in req.keys.into_iter().enumerate() {
        if let Some(message) = validate_key(&key) {
            slots[idx] = Some(delete_error_result(key, &CacheError::BadRequest(message)));
        } else {
            engine_keys.push(key);
            engine_slots.push(idx);
        }
    }

    let results = state.cache.batch_delete(engine_keys).await?;
    for (slot, (key, outcome)) in engine_slots.into_iter().zip(results) {
        slots[slot] = Some(match outcome {
            Ok(true) => BatchDeleteResult {
                key,
                status: BatchDeleteStatus::Deleted,
                error: None,
            },
            Ok(false) => BatchDeleteResult {
                key,
                status: BatchDeleteStatus::Missing,
                error: None,
            },
            Err(error) => delete_error_result(key, &error),
        });
    }

    Ok(Json(BatchDeleteResponse {
        results: slots.into_iter().flatten().collect(),
    }))
}

fn set_error_result(key: String, error: &CacheError) -> BatchSetResult {
    BatchSetResult {
        key,
        status: BatchSetStatus::Error,
        version: None,
        error: Some(BatchItemError {
            code: error.code(),
            message: error.to_string(),
        }),
    }
}

fn delete_error_result(key: String, error: &CacheError) -> BatchDeleteResult {
    BatchDeleteResult {
        key,
        status: BatchDeleteStatus::Error,
        error: Some(BatchItemError {
            code: error.code(),
            message: error.to_string(),
        }),
    }
}

// == Increment Handler ==
/// Handler for `POST /v1/kv/incr`.
pub async fn incr_handler(
    State(state): State<AppState>,
    Json(req): Json<IncrRequest>,
) -> Result<Json<IncrResponse>> {
    if let Some(message) = validate_key(&req.key) {
        return Err(CacheError::BadRequest(message));
    }

    let outcome = state
        .cache
        .increment(req.key.clone(), f64::from(req.delta))
        .await?;
    Ok(Json(IncrResponse {
        key: req.key,
        value: outcome.value,
        version: outcome.version,
    }))
}

// == Stats & Probe Handlers ==
/// Handler for `GET /v1/stats`.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StoreStats> {
    Json(state.cache.stats())
}

/// Handler for `GET /healthz`.
pub async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Handler for `GET /readyz`. Flips to 503 once draining begins.
pub async fn readyz_handler(State(state): State<AppState>) -> Response {
    if state.cache.is_draining() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "draining" })),
        )
            .into_response()
    } else {
        Json(json!({ "status": "ready" })).into_response()
    }
}

/// Handler for `GET /metrics`: Prometheus text exposition of the engine's
/// counters and gauges.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = render_prometheus(&state.cache.stats());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

// == Prometheus Rendering ==
fn render_prometheus(stats: &StoreStats) -> String {
    let mut out = String::with_capacity(4096);

    let counters: &[(&str, &str, u64)] = &[
        ("cache_hits_total", "Read fast-path hits", stats.totals.hits),
        ("cache_misses_total", "Read fast-path misses", stats.totals.misses),
        ("cache_sets_total", "Committed writes", stats.totals.sets),
        ("cache_deletes_total", "Committed deletes", stats.totals.deletes),
        (
            "cache_evictions_total",
            "Entries evicted by the LRU",
            stats.totals.evictions,
        ),
        (
            "cache_expirations_total",
            "Entries removed by TTL expiry",
            stats.totals.expirations,
        ),
        (
            "cache_conflicts_total",
            "CAS precondition failures",
            stats.totals.conflicts,
        ),
        (
            "cache_auth_failures_total",
            "Requests with a missing or invalid API token",
            stats.auth_failures,
        ),
    ];
    for (name, help, value) in counters {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
        ));
    }

    let gauges: &[(&str, &str, f64)] = &[
        (
            "cache_entries_total",
            "Live entries across all shards",
            stats.entries as f64,
        ),
        (
            "cache_bytes",
            "Bytes charged across all shards",
            stats.bytes as f64,
        ),
        (
            "cache_inflight",
            "Requests currently admitted",
            stats.in_flight as f64,
        ),
        (
            "cache_imbalance",
            "Coefficient of variation of entry counts across shards",
            stats.imbalance,
        ),
        ("cache_hit_rate", "Hits over total lookups", stats.hit_rate),
    ];
    for (name, help, value) in gauges {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
        ));
    }

    out.push_str(
        "# HELP cache_backpressure_total Admissions refused by load shedding\n\
         # TYPE cache_backpressure_total counter\n",
    );
    out.push_str(&format!(
        "cache_backpressure_total{{reason=\"max_inflight_exceeded\"}} {}\n",
        stats.backpressure.max_inflight_exceeded
    ));
    out.push_str(&format!(
        "cache_backpressure_total{{reason=\"mailbox_full\"}} {}\n",
        stats.backpressure.mailbox_full
    ));

    out.push_str(
        "# HELP cache_shard_entries Live entries per shard\n\
         # TYPE cache_shard_entries gauge\n",
    );
    for shard in &stats.shards {
        out.push_str(&format!(
            "cache_shard_entries{{shard=\"{}\"}} {}\n",
            shard.shard, shard.entries
        ));
    }
    out.push_str(
        "# HELP cache_mailbox_depth Pending mutations per shard mailbox\n\
         # TYPE cache_mailbox_depth gauge\n",
    );
    for shard in &stats.shards {
        out.push_str(&format!(
            "cache_mailbox_depth{{shard=\"{}\"}} {}\n",
            shard.shard, shard.mailbox_depth
        ));
    }

    out.push_str(
        "# HELP cache_payload_bytes Sizes of accepted write payloads\n\
         # TYPE cache_payload_bytes histogram\n",
    );
    for bucket in &stats.payload_bytes.buckets {
        out.push_str(&format!(
            "cache_payload_bytes_bucket{{le=\"{}\"}} {}\n",
            bucket.le, bucket.count
        ));
    }
    out.push_str(&format!(
        "cache_payload_bytes_bucket{{le=\"+Inf\"}} {}\n",
        stats.payload_bytes.count
    ));
    out.push_str(&format!(
        "cache_payload_bytes_sum {}\ncache_payload_bytes_count {}\n",
        stats.payload_bytes.sum, stats.payload_bytes.count
    ));

    out
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_state() -> AppState {
        let config = Config {
            api_token: "test-token".to_string(),
            shards: 2,
            ..Config::default()
        };
        let store = CacheStore::new(StoreConfig {
            shards: 2,
            sweep_interval: Duration::from_secs(60),
            ..StoreConfig::default()
        });
        AppState::new(Arc::new(store), &config)
    }

    #[tokio::test]
    async fn test_put_then_get_handler() {
        let state = test_state();

        let req = SetRequest {
            value: json!("hello"),
            ttl_sec: None,
            encoding: None,
        };
        let response = put_kv_handler(
            State(state.clone()),
            Path("greeting".to_string()),
            HeaderMap::new(),
            Json(req),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let Json(response) = get_kv_handler(
            State(state),
            Path("greeting".to_string()),
            Query(GetQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(response.value, json!("hello"));
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let state = test_state();

        let result = get_kv_handler(
            State(state),
            Path("nope".to_string()),
            Query(GetQuery::default()),
        )
        .await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_put_rejects_zero_ttl() {
        let state = test_state();

        let req = SetRequest {
            value: json!("v"),
            ttl_sec: Some(0),
            encoding: None,
        };
        let result =
            put_kv_handler(State(state), Path("k".to_string()), HeaderMap::new(), Json(req)).await;
        assert!(matches!(result, Err(CacheError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_delete_handler_status_codes() {
        let state = test_state();

        let req = SetRequest {
            value: json!("v"),
            ttl_sec: None,
            encoding: None,
        };
        put_kv_handler(
            State(state.clone()),
            Path("k".to_string()),
            HeaderMap::new(),
            Json(req),
        )
        .await
        .unwrap();

        let status = delete_kv_handler(
            State(state.clone()),
            Path("k".to_string()),
            HeaderMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let result =
            delete_kv_handler(State(state), Path("k".to_string()), HeaderMap::new()).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_cas_preconditions_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(cas_preconditions(&headers).unwrap(), (None, false));

        headers.insert(header::IF_NONE_MATCH, "*".parse().unwrap());
        assert_eq!(cas_preconditions(&headers).unwrap(), (None, true));

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MATCH, "\"v123\"".parse().unwrap());
        assert_eq!(
            cas_preconditions(&headers).unwrap(),
            (Some("v123".to_string()), false)
        );
    }

    #[test]
    fn test_cas_preconditions_rejects_non_wildcard() {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, "\"v1\"".parse().unwrap());
        assert!(cas_preconditions(&headers).is_err());
    }

    #[test]
    fn test_cas_preconditions_mutually_exclusive() {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, "*".parse().unwrap());
        headers.insert(header::IF_MATCH, "v1".parse().unwrap());
        assert!(cas_preconditions(&headers).is_err());
    }

    #[tokio::test]
    async fn test_render_prometheus_contains_expected_families() {
        let state = test_state();
        let _ = state.cache.get("miss");

        let body = render_prometheus(&state.cache.stats());
        assert!(body.contains("# TYPE cache_hits_total counter"));
        assert!(body.contains("cache_misses_total 1"));
        assert!(body.contains("cache_entries_total 0"));
        assert!(body.contains("cache_backpressure_total{reason=\"max_inflight_exceeded\"} 0"));
        assert!(body.contains("cache_payload_bytes_bucket{le=\"+Inf\"}"));
        assert!(body.contains("cache_shard_entries{shard=\"0\"}"));
    }
}
