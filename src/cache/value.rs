//! Value Model
//!
//! Tagged sum of the storable payload types, inferred once from the wire
//! JSON at set time, plus byte sizing and version-token minting. The engine
//! never carries an untyped "any value" past this boundary.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{CacheError, Result};

/// Wire tag selecting raw byte payloads (base64-encoded in transit).
pub const ENCODING_BASE64: &str = "base64";

// == Value Kind ==
/// Type discriminator exposed on reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Json,
    Bytes,
}

// == Value ==
/// A stored payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    Bool(bool),
    Json(JsonValue),
    Bytes(Bytes),
}

impl Value {
    /// Infers a typed value from a wire JSON payload.
    ///
    /// With `encoding` set to `"base64"` the payload must be a JSON string
    /// and is decoded to raw bytes. Otherwise the type follows the JSON
    /// shape: string, finite number, boolean, or object/array. `null` and
    /// non-finite numbers are rejected here, before the engine sees them.
    pub fn from_wire(raw: JsonValue, encoding: Option<&str>) -> Result<Self> {
        match encoding {
            Some(ENCODING_BASE64) => match raw {
                JsonValue::String(s) => {
                    let buf = BASE64.decode(s.as_bytes()).map_err(|e| {
                        CacheError::BadRequest(format!("invalid base64 payload: {e}"))
                    })?;
                    Ok(Value::Bytes(Bytes::from(buf)))
                }
                _ => Err(CacheError::BadRequest(
                    "base64-encoded values must be JSON strings".to_string(),
                )),
            },
            Some(other) => Err(CacheError::BadRequest(format!(
                "unsupported encoding '{other}'"
            ))),
            None => match raw {
                JsonValue::Null => Err(CacheError::BadRequest(
                    "null values are not storable".to_string(),
                )),
                JsonValue::Bool(b) => Ok(Value::Bool(b)),
                JsonValue::Number(n) => match n.as_f64().filter(|f| f.is_finite()) {
                    Some(f) => Ok(Value::Number(f)),
                    None => Err(CacheError::BadRequest(
                        "numeric values must be finite".to_string(),
                    )),
                },
                JsonValue::String(s) => Ok(Value::Text(s)),
                value @ (JsonValue::Object(_) | JsonValue::Array(_)) => Ok(Value::Json(value)),
            },
        }
    }

    /// The type discriminator for this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::String,
            Value::Number(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Json(_) => ValueKind::Json,
            Value::Bytes(_) => ValueKind::Bytes,
        }
    }

    /// Footprint charged against the byte budget.
    ///
    /// Strings charge their UTF-8 length, numbers a fixed 8, booleans 1,
    /// structured values the length of their canonical serialization, and
    /// byte payloads their decoded length.
    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Text(s) => s.len(),
            Value::Number(_) => 8,
            Value::Bool(_) => 1,
            Value::Json(v) => serde_json::to_string(v).map(|s| s.len()).unwrap_or(0),
            Value::Bytes(b) => b.len(),
        }
    }

    /// The numeric payload, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Renders the value back into wire JSON; byte payloads are
    /// base64-encoded.
    pub fn to_wire(&self) -> JsonValue {
        match self {
            Value::Text(s) => JsonValue::String(s.clone()),
            // Stored numbers are always finite, so the conversion holds.
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(JsonValue::Null, JsonValue::Number),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Json(v) => v.clone(),
            Value::Bytes(b) => JsonValue::String(BASE64.encode(b)),
        }
    }
}

// == Version Minting ==
/// Produces a fresh CAS token: 12 hex digits of the millisecond timestamp
/// followed by 16 hex digits of randomness. Fixed-width hex keeps tokens
/// lexicographically sortable by mint time.
pub fn mint_version(now_ms: u64) -> String {
    format!("{now_ms:012x}{:016x}", rand::random::<u64>())
}
