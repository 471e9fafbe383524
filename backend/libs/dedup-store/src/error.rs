//! Error types for the dedup store

use thiserror::Error;

pub type DedupStoreResult<T> = Result<T, DedupStoreError>;

#[derive(Debug, Error)]
pub enum DedupStoreError {
    /// Backend unreachable or timed out. Must be treated as retryable by
    /// callers, never as "event not seen before".
    #[error("dedup store unavailable: {0}")]
    Unavailable(String),

    /// Event ID validation failed (empty or over the length limit).
    #[error("invalid event ID: {0}")]
    InvalidEventId(String),
}

impl DedupStoreError {
    /// Whether the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DedupStoreError::Unavailable(_))
    }
}

impl From<redis::RedisError> for DedupStoreError {
    fn from(err: redis::RedisError) -> Self {
        DedupStoreError::Unavailable(err.to_string())
    }
}
