//! In-memory implementation of the claim protocol
//!
//! Same semantics as the Redis store over a process-local map. Useful for
//! tests and single-process local development; it cannot provide cross-host
//! dedup, so production deployments use [`RedisDedupStore`].
//!
//! [`RedisDedupStore`]: crate::RedisDedupStore

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::DedupStoreResult;
use crate::{validate_event_id, ClaimOutcome, ClaimToken, DedupStore};

#[derive(Debug, Clone, PartialEq, Eq)]
enum RecordStatus {
    Leased(String),
    Done,
    DeadLettered,
}

#[derive(Debug, Clone)]
struct Record {
    status: RecordStatus,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryDedupStore {
    records: Mutex<HashMap<String, Record>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark(
        &self,
        event_id: &str,
        token: &ClaimToken,
        status: RecordStatus,
        ttl: Duration,
    ) -> DedupStoreResult<bool> {
        validate_event_id(event_id)?;

        let mut records = self.records.lock().expect("dedup map poisoned");
        let now = Instant::now();

        let marked = match live_record(&mut records, event_id, now) {
            Some(record) => {
                let owns_lease = matches!(
                    &record.status,
                    RecordStatus::Leased(held) if held == token.as_str()
                );
                if owns_lease {
                    record.status = status;
                    record.expires_at = now + ttl;
                    true
                } else {
                    // re-marking an already-terminal record is a no-op
                    record.status == status
                }
            }
            None => false,
        };

        Ok(marked)
    }
}

/// Look up the record for `event_id`, dropping it first if its TTL passed.
fn live_record<'a>(
    records: &'a mut HashMap<String, Record>,
    event_id: &str,
    now: Instant,
) -> Option<&'a mut Record> {
    if records
        .get(event_id)
        .is_some_and(|record| record.expires_at <= now)
    {
        records.remove(event_id);
    }
    records.get_mut(event_id)
}

#[async_trait::async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn try_claim(
        &self,
        event_id: &str,
        lease_ttl: Duration,
    ) -> DedupStoreResult<ClaimOutcome> {
        validate_event_id(event_id)?;

        let mut records = self.records.lock().expect("dedup map poisoned");
        let now = Instant::now();

        match live_record(&mut records, event_id, now) {
            Some(record) => match record.status {
                RecordStatus::Done | RecordStatus::DeadLettered => Ok(ClaimOutcome::AlreadyDone),
                RecordStatus::Leased(_) => Ok(ClaimOutcome::AlreadyInProgress),
            },
            None => {
                let token = ClaimToken::generate();
                records.insert(
                    event_id.to_string(),
                    Record {
                        status: RecordStatus::Leased(token.as_str().to_string()),
                        expires_at: now + lease_ttl,
                    },
                );
                Ok(ClaimOutcome::Claimed(token))
            }
        }
    }

    async fn mark_done(
        &self,
        event_id: &str,
        token: &ClaimToken,
        ttl: Duration,
    ) -> DedupStoreResult<bool> {
        self.mark(event_id, token, RecordStatus::Done, ttl)
    }

    async fn mark_dead_lettered(
        &self,
        event_id: &str,
        token: &ClaimToken,
        ttl: Duration,
    ) -> DedupStoreResult<bool> {
        self.mark(event_id, token, RecordStatus::DeadLettered, ttl)
    }

    async fn release(&self, event_id: &str, token: &ClaimToken) -> DedupStoreResult<()> {
        validate_event_id(event_id)?;

        let mut records = self.records.lock().expect("dedup map poisoned");

        if let Some(record) = records.get(event_id) {
            if record.status == RecordStatus::Leased(token.as_str().to_string()) {
                records.remove(event_id);
            }
        }

        Ok(())
    }
}
