//! Request and Response models for the cache server API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{
    validate_batch_len, validate_key, validate_ttl, BatchDeleteRequest, BatchGetRequest,
    BatchSetItemRequest, BatchSetRequest, GetQuery, IncrRequest, SetRequest,
};
pub use responses::{
    BatchDeleteResponse, BatchDeleteResult, BatchDeleteStatus, BatchGetResponse, BatchItemError,
    BatchSetResponse, BatchSetResult, BatchSetStatus, EntryMeta, GetResponse, HealthResponse,
    IncrResponse, SetResponse,
};
