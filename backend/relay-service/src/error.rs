use event_schema::DecodeError;
use resilience::ErrorKind;
use thiserror::Error;

use crate::sinks::SinkError;
use dedup_store::DedupStoreError;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("dedup store error: {0}")]
    Store(#[from] DedupStoreError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// The dedup record for a forwarded event could not be finalized.
    /// Surfaced to the consumer loop so the offset stays uncommitted.
    #[error("dedup record not finalized: {0}")]
    Finalize(String),

    #[error("dead-letter publish error: {0}")]
    DeadLetter(String),

    #[error("kafka error: {0}")]
    Kafka(String),

    #[error("shutdown requested")]
    ShuttingDown,
}

impl RelayError {
    /// Classify for the retry policy. Anything that could succeed on a
    /// later attempt is transient; payload-shaped failures are permanent.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Decode(_) => ErrorKind::Permanent,
            RelayError::Store(e) => {
                if e.is_transient() {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Permanent
                }
            }
            RelayError::Sink(e) => e.kind(),
            RelayError::Finalize(_)
            | RelayError::DeadLetter(_)
            | RelayError::Kafka(_)
            | RelayError::ShuttingDown => ErrorKind::Transient,
        }
    }
}
