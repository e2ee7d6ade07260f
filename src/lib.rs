//! Cachelet - a sharded in-memory key-value cache server
//!
//! Serves string, number, boolean, JSON, and opaque byte values with
//! per-key TTL, size-aware LRU eviction, and compare-and-swap via entity
//! versions, over a small HTTP/JSON surface.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;

pub use api::AppState;
pub use config::Config;
