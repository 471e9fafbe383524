//! Downstream sink seams
//!
//! The relay forwards validated events through the [`FeedSink`] capability
//! and routes unprocessable ones through [`DeadLetterSink`]. Both are traits
//! so tests (and alternative deployments) can swap the transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_schema::FeedEvent;
use resilience::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod redis_sink;

pub use redis_sink::RedisFeedSink;

use crate::relay::EventCoordinates;

/// Acknowledgement returned by a sink on successful delivery.
#[derive(Debug, Clone, Default)]
pub struct Ack {
    /// Sink-assigned position detail for logs (list length, offset, ...)
    pub detail: Option<String>,
}

#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink refused the event itself; retrying cannot help.
    #[error("sink rejected event: {0}")]
    Rejected(String),

    /// The sink could not be reached.
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete in time.
    #[error("sink timed out: {0}")]
    Timeout(String),
}

impl SinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Rejected(_) => ErrorKind::Permanent,
            SinkError::Unavailable(_) | SinkError::Timeout(_) => ErrorKind::Transient,
        }
    }
}

/// Downstream delivery capability. Implementations must tolerate being
/// called again for an event they already accepted; the dedup layer keeps
/// that rare, not impossible.
#[async_trait]
pub trait FeedSink: Send + Sync {
    async fn forward(&self, event: &FeedEvent) -> Result<Ack, SinkError>;
}

/// Why a message ended up on the dead-letter path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Would fail identically on every retry (malformed, unsupported)
    Permanent,
    /// Transient failures past the retry budget
    Exhausted,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FailureClass::Permanent => write!(f, "permanent"),
            FailureClass::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Everything an operator needs to triage a dead-lettered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Present when the payload decoded far enough to expose an ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// The payload as received; raw text when it was not valid JSON
    pub original_payload: serde_json::Value,
    pub error_kind: FailureClass,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(
        event_id: Option<String>,
        coords: &EventCoordinates,
        payload: &[u8],
        error_kind: FailureClass,
        attempts: u32,
        last_error: String,
    ) -> Self {
        let original_payload = serde_json::from_slice(payload)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(payload).into()));

        Self {
            event_id,
            topic: coords.topic.clone(),
            partition: coords.partition,
            offset: coords.offset,
            original_payload,
            error_kind,
            attempts,
            last_error,
            failed_at: Utc::now(),
        }
    }
}

/// Side channel for messages that cannot be processed.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, entry: &DeadLetterEntry) -> Result<(), SinkError>;
}
