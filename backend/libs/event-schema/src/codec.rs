//! JSON codec for [`FeedEvent`]
//!
//! Pure functions of their input bytes. Decoding distinguishes payloads that
//! can never parse (malformed, missing `event_id`/`kind`) from payloads a
//! newer deployment produced (`schema_version` above ours), because the two
//! are handled differently by the relay.

use serde::Deserialize;
use thiserror::Error;

use crate::{is_supported, FeedEvent, SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Invalid JSON or missing required fields. Retrying never helps.
    #[error("malformed activity payload: {0}")]
    MalformedPayload(String),

    /// Payload declares a schema version newer than this build supports.
    #[error("unsupported schema version {found} (max supported {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

#[derive(Debug, Error)]
#[error("failed to serialize activity event: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Minimal probe decoded before the full event, so a well-formed payload
/// from a newer producer is reported as UnsupportedVersion rather than
/// failing field-by-field as malformed.
#[derive(Deserialize)]
struct VersionProbe {
    #[serde(default = "current_version")]
    schema_version: u32,
}

fn current_version() -> u32 {
    SCHEMA_VERSION
}

pub fn encode(event: &FeedEvent) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(event)?)
}

pub fn decode(bytes: &[u8]) -> Result<FeedEvent, DecodeError> {
    let probe: VersionProbe = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;

    if !is_supported(probe.schema_version) {
        return Err(DecodeError::UnsupportedVersion {
            found: probe.schema_version,
            supported: SCHEMA_VERSION,
        });
    }

    let event: FeedEvent = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;

    if event.event_id.is_empty() {
        return Err(DecodeError::MalformedPayload(
            "event_id is empty".to_string(),
        ));
    }

    Ok(event)
}
