//! API Module
//!
//! HTTP handlers, token auth, and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /v1/kv/:key` - Store a value with optional TTL and CAS headers
//! - `GET /v1/kv/:key` - Retrieve a value by key
//! - `DELETE /v1/kv/:key` - Delete a key
//! - `POST /v1/kv/batch/{get,set,delete}` - Batch operations
//! - `POST /v1/kv/incr` - Atomic increment
//! - `GET /v1/stats` - Statistics
//! - `GET /healthz`, `GET /readyz`, `GET /metrics` - Probes and scrape

pub mod auth;
pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;
