//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::str::FromStr;

use thiserror::Error;

/// Default per-entry size ceiling: 256 MiB.
pub const DEFAULT_MAX_ITEM_BYTES: usize = 256 * 1024 * 1024;

/// Minimum accepted request timeout.
const MIN_REQUEST_TIMEOUT_MS: u64 = 100;

/// Errors raised while loading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Server configuration parameters.
///
/// All values except `API_TOKEN` can be omitted and fall back to defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub port: u16,
    /// Shared secret expected in the `X-API-Token` header
    pub api_token: String,
    /// Whether read endpoints also require the API token
    pub read_requires_auth: bool,
    /// Number of shards the keyspace is partitioned into
    pub shards: usize,
    /// Per-entry size ceiling in bytes
    pub max_item_bytes: usize,
    /// Optional total byte budget, divided equally across shards
    pub memory_budget_bytes: Option<u64>,
    /// Boundary-enforced request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Store-wide cap on concurrently admitted requests
    pub max_inflight: usize,
    /// Per-shard mailbox capacity
    pub max_shard_mailbox: usize,
    /// Default log level when RUST_LOG is not set
    pub log_level: String,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `PORT` - HTTP server port (default: 8080)
    /// - `API_TOKEN` - shared auth token (required, non-empty)
    /// - `READ_REQUIRES_AUTH` - require the token on reads too (default: false)
    /// - `SHARDS` - shard count (default: CPU count)
    /// - `MAX_ITEM_BYTES` - per-entry size ceiling (default: 256 MiB)
    /// - `MEMORY_BUDGET_BYTES` - total byte budget across shards (default: unset)
    /// - `REQUEST_TIMEOUT_MS` - boundary timeout, minimum 100 (default: 5000)
    /// - `MAX_INFLIGHT` - store-wide in-flight cap (default: 1024)
    /// - `MAX_SHARD_MAILBOX` - per-shard mailbox capacity (default: 1024)
    /// - `LOG_LEVEL` - default tracing level (default: "info")
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_token = env::var("API_TOKEN").map_err(|_| ConfigError::Missing("API_TOKEN"))?;
        if api_token.is_empty() {
            return Err(ConfigError::Invalid {
                name: "API_TOKEN",
                reason: "must not be empty".to_string(),
            });
        }

        let config = Self {
            port: parse_var("PORT", 8080)?,
            api_token,
            read_requires_auth: parse_bool("READ_REQUIRES_AUTH", false)?,
            shards: parse_var("SHARDS", num_cpus::get().max(1))?,
            max_item_bytes: parse_var("MAX_ITEM_BYTES", DEFAULT_MAX_ITEM_BYTES)?,
            memory_budget_bytes: parse_optional("MEMORY_BUDGET_BYTES")?,
            request_timeout_ms: parse_var("REQUEST_TIMEOUT_MS", 5000)?,
            max_inflight: parse_var("MAX_INFLIGHT", 1024)?,
            max_shard_mailbox: parse_var("MAX_SHARD_MAILBOX", 1024)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.shards == 0 {
            return Err(ConfigError::Invalid {
                name: "SHARDS",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_item_bytes == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_ITEM_BYTES",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout_ms < MIN_REQUEST_TIMEOUT_MS {
            return Err(ConfigError::Invalid {
                name: "REQUEST_TIMEOUT_MS",
                reason: format!("must be at least {MIN_REQUEST_TIMEOUT_MS}"),
            });
        }
        if self.max_inflight == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_INFLIGHT",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_shard_mailbox == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_SHARD_MAILBOX",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            api_token: "dev-token".to_string(),
            read_requires_auth: false,
            shards: num_cpus::get().max(1),
            max_item_bytes: DEFAULT_MAX_ITEM_BYTES,
            memory_budget_bytes: None,
            request_timeout_ms: 5000,
            max_inflight: 1024,
            max_shard_mailbox: 1024,
            log_level: "info".to_string(),
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

fn parse_optional<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Err(_) => Ok(None),
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
    }
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.as_str() {
            "1" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "false" | "FALSE" | "False" => Ok(false),
            other => Err(ConfigError::Invalid {
                name,
                reason: format!("expected a boolean, got '{other}'"),
            }),
        },
    }
}
