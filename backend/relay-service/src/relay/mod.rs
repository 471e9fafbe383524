//! Ingestion relay state machine
//!
//! Drives each fetched message to a terminal state before its offset may be
//! committed:
//!
//! ```text
//! Fetched -> Decoding -> Claiming -> Forwarding -> Committing -> Done
//!                |           |            |             |
//!                |           |            |             +-- retried in place
//!                |           +------------+-- Retrying (backoff, re-claim)
//!                +-- DeadLettered (permanent, zero retries)
//! ```
//!
//! Transient failures loop back through the retry policy; permanent and
//! budget-exhausted failures land on the dead-letter sink with full context.
//! The dedup record is made durable before the caller commits the offset:
//! a crash after `mark_done` but before the commit only costs a cheap
//! `AlreadyDone` fast path on redelivery.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use dedup_store::{ClaimOutcome, ClaimToken, DedupStore};
use event_schema::FeedEvent;
use resilience::{ErrorKind, RetryDecision, RetryPolicy};

use crate::error::{RelayError, Result};
use crate::metrics;
use crate::sinks::{DeadLetterEntry, DeadLetterSink, FailureClass, FeedSink};

/// Transport position of a message, owned by the consumer-group protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCoordinates {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl std::fmt::Display for EventCoordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A fetched message before decoding.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub coords: EventCoordinates,
    pub payload: Vec<u8>,
}

/// Terminal state of one message. Either way the offset may advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The event finished processing; `delivered` is false for duplicates
    /// that skipped the sink.
    Done { delivered: bool, attempts: u32 },
    /// The event was routed to the dead-letter sink.
    DeadLettered { class: FailureClass, attempts: u32 },
}

/// Tunables for one relay instance.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub policy: RetryPolicy,
    /// Retention of terminal dedup records
    pub dedup_ttl: Duration,
    /// Lifetime of a processing lease
    pub lease_ttl: Duration,
    /// Fixed re-check delay when another worker holds the lease; does not
    /// consume the retry budget
    pub in_progress_delay: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            dedup_ttl: Duration::from_secs(24 * 3600),
            lease_ttl: Duration::from_secs(30),
            in_progress_delay: Duration::from_millis(250),
        }
    }
}

/// One claim-forward-commit pass over an event.
enum Attempt {
    Delivered,
    Duplicate,
    InProgress,
}

pub struct Relay {
    dedup: Arc<dyn DedupStore>,
    sink: Arc<dyn FeedSink>,
    dead_letters: Arc<dyn DeadLetterSink>,
    settings: RelaySettings,
    shutdown: watch::Receiver<bool>,
}

impl Relay {
    pub fn new(
        dedup: Arc<dyn DedupStore>,
        sink: Arc<dyn FeedSink>,
        dead_letters: Arc<dyn DeadLetterSink>,
        settings: RelaySettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            dedup,
            sink,
            dead_letters,
            settings,
            shutdown,
        }
    }

    /// Drive a fetched message to a terminal state.
    ///
    /// `Ok(outcome)` means the offset may be committed. `Err` means it must
    /// not be (shutdown mid-retry, or the dead-letter/dedup record could not
    /// be made durable); the broker will redeliver.
    pub async fn process(&self, msg: RawMessage) -> Result<RelayOutcome> {
        // Decoding: corrupt payloads will never parse differently, so they
        // go straight to the dead-letter sink without touching the budget.
        let event = match event_schema::decode(&msg.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(coords = %msg.coords, error = %err, "undecodable message, dead-lettering");
                let entry = DeadLetterEntry::new(
                    None,
                    &msg.coords,
                    &msg.payload,
                    FailureClass::Permanent,
                    0,
                    err.to_string(),
                );
                self.publish_dead_letter(&entry).await?;
                metrics::record_outcome("dead_lettered");
                return Ok(RelayOutcome::DeadLettered {
                    class: FailureClass::Permanent,
                    attempts: 0,
                });
            }
        };

        let age = (Utc::now() - event.produced_at).to_std().unwrap_or_default();
        metrics::observe_staleness(age);

        self.drive(&event, &msg).await
    }

    async fn drive(&self, event: &FeedEvent, msg: &RawMessage) -> Result<RelayOutcome> {
        let mut attempts: u32 = 0;

        loop {
            let err = match self.attempt(event).await {
                Ok(Attempt::Delivered) => {
                    metrics::record_outcome("delivered");
                    debug!(event_id = %event.event_id, coords = %msg.coords, attempts, "event delivered");
                    return Ok(RelayOutcome::Done {
                        delivered: true,
                        attempts,
                    });
                }
                Ok(Attempt::Duplicate) => {
                    metrics::record_outcome("duplicate");
                    debug!(event_id = %event.event_id, coords = %msg.coords, "duplicate delivery, offset advances");
                    return Ok(RelayOutcome::Done {
                        delivered: false,
                        attempts,
                    });
                }
                Ok(Attempt::InProgress) => {
                    // Another worker is on it; re-check shortly. This is
                    // not a failure and spends no retry budget.
                    metrics::record_in_progress_wait();
                    self.wait(self.settings.in_progress_delay).await?;
                    continue;
                }
                // The event was already forwarded; looping back through
                // Claiming would deliver it twice. Leave the offset
                // uncommitted and let redelivery hit the dedup fast path.
                Err(err @ RelayError::Finalize(_)) => return Err(err),
                Err(err) => err,
            };

            match self.settings.policy.next(attempts, err.kind()) {
                RetryDecision::RetryAfter(delay) => {
                    attempts += 1;
                    metrics::record_retry();
                    warn!(
                        event_id = %event.event_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    self.wait(delay).await?;
                }
                RetryDecision::GiveUp => {
                    let class = match err.kind() {
                        ErrorKind::Permanent => FailureClass::Permanent,
                        ErrorKind::Transient => FailureClass::Exhausted,
                    };
                    error!(
                        event_id = %event.event_id,
                        coords = %msg.coords,
                        attempts,
                        class = %class,
                        error = %err,
                        "giving up, dead-lettering"
                    );
                    let entry = DeadLetterEntry::new(
                        Some(event.event_id.clone()),
                        &msg.coords,
                        &msg.payload,
                        class,
                        attempts,
                        err.to_string(),
                    );
                    self.publish_dead_letter(&entry).await?;
                    self.record_dead_lettered(&event.event_id).await;
                    metrics::record_outcome("dead_lettered");
                    return Ok(RelayOutcome::DeadLettered { class, attempts });
                }
            }
        }
    }

    /// Claiming -> Forwarding -> Committing for one pass.
    async fn attempt(&self, event: &FeedEvent) -> Result<Attempt> {
        // Claiming: a store error here is never "not a duplicate"
        let token = match self
            .dedup
            .try_claim(&event.event_id, self.settings.lease_ttl)
            .await?
        {
            ClaimOutcome::AlreadyDone => return Ok(Attempt::Duplicate),
            ClaimOutcome::AlreadyInProgress => return Ok(Attempt::InProgress),
            ClaimOutcome::Claimed(token) => token,
        };

        // Forwarding
        let ack = match self.sink.forward(event).await {
            Ok(ack) => ack,
            Err(err) => {
                // free the lease so the retry does not have to wait it out
                if let Err(release_err) = self.dedup.release(&event.event_id, &token).await {
                    warn!(
                        event_id = %event.event_id,
                        error = %release_err,
                        "failed to release claim after sink failure"
                    );
                }
                return Err(err.into());
            }
        };

        // Committing: the dedup record becomes durable before the offset
        // commit that follows in the consumer loop
        self.finalize(&event.event_id, &token).await?;

        debug!(
            event_id = %event.event_id,
            ack = ack.detail.as_deref().unwrap_or("-"),
            "event forwarded"
        );
        Ok(Attempt::Delivered)
    }

    /// Retry `mark_done` in place. The forward already happened, so this
    /// stage never loops back to Claiming.
    async fn finalize(&self, event_id: &str, token: &ClaimToken) -> Result<()> {
        let mut attempts: u32 = 0;

        loop {
            match self
                .dedup
                .mark_done(event_id, token, self.settings.dedup_ttl)
                .await
            {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    // Lease expired mid-forward and another worker reclaimed
                    // the record; it owns the terminal transition now.
                    warn!(event_id, "lease lost before mark_done");
                    return Ok(());
                }
                Err(err) => match self.settings.policy.next(attempts, ErrorKind::Transient) {
                    RetryDecision::RetryAfter(delay) => {
                        attempts += 1;
                        metrics::record_retry();
                        warn!(event_id, attempt = attempts, error = %err, "mark_done failed, retrying");
                        self.wait(delay).await?;
                    }
                    RetryDecision::GiveUp => return Err(RelayError::Finalize(err.to_string())),
                },
            }
        }
    }

    /// Publish to the dead-letter sink, retrying transient failures. An
    /// undeliverable dead letter fails the whole message so its offset is
    /// not committed; nothing is silently dropped.
    async fn publish_dead_letter(&self, entry: &DeadLetterEntry) -> Result<()> {
        let mut attempts: u32 = 0;

        loop {
            match self.dead_letters.publish(entry).await {
                Ok(()) => return Ok(()),
                Err(err) => match self.settings.policy.next(attempts, err.kind()) {
                    RetryDecision::RetryAfter(delay) => {
                        attempts += 1;
                        warn!(
                            topic = %entry.topic,
                            offset = entry.offset,
                            attempt = attempts,
                            error = %err,
                            "dead-letter publish failed, retrying"
                        );
                        self.wait(delay).await?;
                    }
                    RetryDecision::GiveUp => {
                        error!(
                            topic = %entry.topic,
                            offset = entry.offset,
                            error = %err,
                            "dead-letter publish failed, leaving offset uncommitted"
                        );
                        return Err(RelayError::DeadLetter(err.to_string()));
                    }
                },
            }
        }
    }

    /// Best-effort terminal record for a dead-lettered event so its
    /// redeliveries take the `AlreadyDone` fast path. The lease was already
    /// released on the failure edge, so this re-claims first.
    async fn record_dead_lettered(&self, event_id: &str) {
        match self
            .dedup
            .try_claim(event_id, self.settings.lease_ttl)
            .await
        {
            Ok(ClaimOutcome::Claimed(token)) => {
                if let Err(err) = self
                    .dedup
                    .mark_dead_lettered(event_id, &token, self.settings.dedup_ttl)
                    .await
                {
                    debug!(event_id, error = %err, "could not record dead-letter status");
                }
            }
            Ok(_) => {}
            Err(err) => {
                debug!(event_id, error = %err, "could not record dead-letter status");
            }
        }
    }

    /// Sleep that aborts when shutdown is signalled, so a message stuck in
    /// Retrying does not delay the drain; it stays uncommitted and is
    /// redelivered on restart.
    async fn wait(&self, delay: Duration) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Err(RelayError::ShuttingDown);
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = shutdown.changed() => Err(RelayError::ShuttingDown),
        }
    }
}
