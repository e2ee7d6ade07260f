//! API Token Authentication
//!
//! Shared-token auth via the `X-API-Token` header. Writes always require
//! the token; reads only when configured; health and metrics probes never.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::api::handlers::AppState;
use crate::error::{CacheError, Result};

/// Header carrying the shared API token.
pub const API_TOKEN_HEADER: &str = "x-api-token";

/// Middleware for write routes: the token is always required.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    check_token(&state, &request)?;
    Ok(next.run(request).await)
}

/// Middleware for read routes: the token is only required when
/// `READ_REQUIRES_AUTH` is set.
pub async fn require_token_for_reads(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if state.read_requires_auth {
        check_token(&state, &request)?;
    }
    Ok(next.run(request).await)
}

fn check_token(state: &AppState, request: &Request) -> Result<()> {
    let presented = request
        .headers()
        .get(API_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(token) if token == state.api_token.as_ref() => Ok(()),
        Some(_) => {
            state.cache.counters().auth_failures.inc();
            Err(CacheError::Unauthorized("invalid API token".to_string()))
        }
        None => {
            state.cache.counters().auth_failures.inc();
            Err(CacheError::Unauthorized(format!(
                "missing {API_TOKEN_HEADER} header"
            )))
        }
    }
}
