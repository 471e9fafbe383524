//! Redis-backed idempotency store for Kafka event processing
//!
//! At-least-once delivery means the same `event_id` can arrive more than
//! once, on different partitions and different workers. This crate records
//! which events have been processed so redeliveries collapse into no-ops,
//! using a lease-based claim protocol:
//!
//! ```text
//! try_claim ──► Claimed(token)      this caller owns processing
//!           ──► AlreadyDone         a terminal record exists, skip
//!           ──► AlreadyInProgress   another worker holds a live lease
//! ```
//!
//! A successful claim is finished with `mark_done` (or `mark_dead_lettered`),
//! which swaps the lease for a terminal record retained for the dedup TTL.
//! A failed claim is handed back with `release` so the event can be retried
//! without waiting out the lease.
//!
//! Every operation is a single atomic conditional write against the backing
//! store. There is deliberately no process-local cache of claims: workers on
//! other hosts must observe them.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

mod error;
mod memory;
mod redis_store;

pub use error::{DedupStoreError, DedupStoreResult};
pub use memory::InMemoryDedupStore;
pub use redis_store::RedisDedupStore;

/// Maximum accepted event ID length.
pub const MAX_EVENT_ID_LEN: usize = 255;

/// Opaque proof of lease ownership returned by a successful claim.
///
/// Terminal transitions and releases are conditional on the token so a
/// worker whose lease expired cannot clobber a record another worker has
/// since claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimToken(String);

impl ClaimToken {
    pub(crate) fn generate() -> Self {
        Self(format!("lease:{}", Uuid::new_v4()))
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of attempting to claim an event for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// No record existed; this caller now owns processing under a lease.
    Claimed(ClaimToken),
    /// A terminal record (`done` or `dead-lettered`) exists.
    AlreadyDone,
    /// Another worker holds an unexpired lease.
    AlreadyInProgress,
}

/// The shared claim protocol. All implementations must make each operation
/// a single atomic check-and-set; read-then-write as two steps loses the
/// race between concurrent deliveries of the same event.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Atomically claim `event_id` for processing under a lease of
    /// `lease_ttl`. An unreachable backend is an error, never `Claimed`.
    async fn try_claim(
        &self,
        event_id: &str,
        lease_ttl: Duration,
    ) -> DedupStoreResult<ClaimOutcome>;

    /// Transition a held claim to `done`, retained for `ttl`.
    ///
    /// Returns `false` when the lease was lost (expired and possibly
    /// reclaimed elsewhere); the record is left untouched in that case.
    async fn mark_done(
        &self,
        event_id: &str,
        token: &ClaimToken,
        ttl: Duration,
    ) -> DedupStoreResult<bool>;

    /// Transition a held claim to `dead-lettered`, retained for `ttl`.
    /// Redeliveries of a dead-lettered event observe `AlreadyDone`.
    async fn mark_dead_lettered(
        &self,
        event_id: &str,
        token: &ClaimToken,
        ttl: Duration,
    ) -> DedupStoreResult<bool>;

    /// Give up a held claim after a processing failure so the event can be
    /// reclaimed immediately instead of waiting out the lease.
    async fn release(&self, event_id: &str, token: &ClaimToken) -> DedupStoreResult<()>;
}

pub(crate) fn validate_event_id(event_id: &str) -> DedupStoreResult<()> {
    if event_id.is_empty() {
        return Err(DedupStoreError::InvalidEventId(
            "event ID cannot be empty".to_string(),
        ));
    }

    if event_id.len() > MAX_EVENT_ID_LEN {
        return Err(DedupStoreError::InvalidEventId(format!(
            "event ID too long: {} characters (max {})",
            event_id.len(),
            MAX_EVENT_ID_LEN
        )));
    }

    Ok(())
}
