//! Error types for Palisade operations.
//!
//! Only [`OriginError`] ever reaches the caller of a cache read, and only
//! when no fallback value was supplied. Store trouble degrades to a direct
//! origin call; lock contention and refresh rejection are ordinary outcomes,
//! not errors, and have no variants here.

use thiserror::Error;

/// Failures talking to the origin (the authoritative backing source).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OriginError {
    #[error("origin request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("origin request failed with status {status}: {message}")]
    Request { status: u16, message: String },

    #[error("origin unreachable: {reason}")]
    Unreachable { reason: String },
}

/// Failures talking to the distributed store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("distributed store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("stored value for {key} could not be decoded: {reason}")]
    Codec { key: String, reason: String },
}

/// Top-level error for cache operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Origin(#[from] OriginError),

    /// Surfaced only by operations that mutate the store on the caller's
    /// behalf (explicit invalidation). Reads never return this.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias for Palisade operations.
pub type CacheResult<T> = Result<T, CacheError>;
