//! Error types for the cache server
//!
//! Provides unified error handling using thiserror, with a JSON error
//! envelope and HTTP status mapping at the boundary.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Backpressure Reasons ==
/// Admission refused because the store-wide in-flight cap was reached.
pub const REASON_MAX_INFLIGHT: &str = "max_inflight_exceeded";
/// Admission refused because the owning shard's mailbox was full.
pub const REASON_MAILBOX_FULL: &str = "mailbox_full";
/// Admission refused because the shard is draining for shutdown.
pub const REASON_DRAINING: &str = "shard_draining";

// == Cache Error Enum ==
/// Unified error type for the cache server.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Request validation failed, or an operation was applied to an
    /// incompatible value type (e.g. increment on a string).
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Missing or invalid API token
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Key not found (or already expired)
    #[error("key not found: {0}")]
    NotFound(String),

    /// A CAS precondition (If-Match / If-None-Match) failed
    #[error("version precondition failed for key '{key}'")]
    Conflict {
        key: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Entry exceeds the per-item size ceiling
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// In-flight cap or shard mailbox capacity exhausted
    #[error("overloaded: {reason}")]
    Overloaded { reason: &'static str },

    /// Invariant breach or unexpected failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Stable machine-readable error code carried in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::BadRequest(_) => "bad_request",
            CacheError::Unauthorized(_) => "unauthorized",
            CacheError::NotFound(_) => "not_found",
            CacheError::Conflict { .. } => "conflict",
            CacheError::PayloadTooLarge(_) => "payload_too_large",
            CacheError::Overloaded { .. } => "overloaded",
            CacheError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CacheError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::Conflict { .. } => StatusCode::CONFLICT,
            CacheError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            CacheError::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        let details = match &self {
            CacheError::Conflict {
                key,
                expected,
                actual,
            } => Some(json!({ "key": key, "expected": expected, "actual": actual })),
            CacheError::Overloaded { reason } => Some(json!({ "reason": reason })),
            _ => None,
        };

        let mut body = json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        });
        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        let mut response = (status, Json(body)).into_response();
        if matches!(self, CacheError::Overloaded { .. }) {
            // Tell clients to fail over to another replica immediately.
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("0"));
        }
        response
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache server.
pub type Result<T> = std::result::Result<T, CacheError>;
