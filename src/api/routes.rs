//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.
//!
//! Routes are assembled in three groups with distinct auth policies:
//! writes always require the API token, reads require it only when
//! configured, and probes (`/healthz`, `/readyz`, `/metrics`) are always
//! open.

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::auth;
use super::handlers::{
    batch_delete_handler, batch_get_handler, batch_set_handler, delete_kv_handler, get_kv_handler,
    healthz_handler, incr_handler, metrics_handler, put_kv_handler, readyz_handler, stats_handler,
    AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /v1/kv/:key` - Store a value (CAS via `If-Match` / `If-None-Match: *`)
/// - `GET /v1/kv/:key` - Retrieve a value (`?includeMeta=true` for timestamps)
/// - `DELETE /v1/kv/:key` - Delete a key (optionally conditional)
/// - `POST /v1/kv/batch/get|set|delete` - Batch operations (max 100 items)
/// - `POST /v1/kv/incr` - Atomic increment
/// - `GET /v1/stats` - JSON statistics
/// - `GET /healthz`, `GET /readyz`, `GET /metrics` - Probes and scrape
///
/// # Middleware
/// - Request timeout and body-size limit from configuration
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let write_routes = Router::new()
        .route("/v1/kv/:key", put(put_kv_handler).delete(delete_kv_handler))
        .route("/v1/kv/batch/set", post(batch_set_handler))
        .route("/v1/kv/batch/delete", post(batch_delete_handler))
        .route("/v1/kv/incr", post(incr_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    let read_routes = Router::new()
        .route("/v1/kv/:key", get(get_kv_handler))
        .route("/v1/kv/batch/get", post(batch_get_handler))
        .route("/v1/stats", get(stats_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token_for_reads,
        ));

    let probe_routes = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(write_routes)
        .merge(read_routes)
        .merge(probe_routes)
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_millis(
            state.request_timeout_ms,
        )))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
