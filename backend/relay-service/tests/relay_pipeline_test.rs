//! Integration tests for the ingestion relay state machine
//!
//! Exercises the full claim/forward/commit pipeline against in-memory
//! collaborators: a scripted sink, a recording dead-letter sink, and the
//! in-memory dedup store (optionally wrapped to inject outages).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use dedup_store::{
    ClaimOutcome, ClaimToken, DedupStore, DedupStoreError, DedupStoreResult, InMemoryDedupStore,
};
use event_schema::{ActivityAction, ActivityPayload, FeedEvent, PostActivity, SCHEMA_VERSION};
use relay_service::relay::{EventCoordinates, RawMessage, Relay, RelayOutcome, RelaySettings};
use relay_service::sinks::{Ack, DeadLetterEntry, DeadLetterSink, FailureClass, FeedSink, SinkError};
use relay_service::RelayError;
use resilience::RetryPolicy;

/// Sink that pops a scripted failure per call before accepting deliveries.
#[derive(Default)]
struct ScriptedSink {
    delivered: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<SinkError>>,
}

impl ScriptedSink {
    fn failing_with(failures: Vec<SinkError>) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            failures: Mutex::new(failures.into()),
        }
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSink for ScriptedSink {
    async fn forward(&self, event: &FeedEvent) -> Result<Ack, SinkError> {
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.delivered.lock().unwrap().push(event.event_id.clone());
        Ok(Ack::default())
    }
}

#[derive(Default)]
struct RecordingDlq {
    entries: Mutex<Vec<DeadLetterEntry>>,
    failures: Mutex<VecDeque<SinkError>>,
}

impl RecordingDlq {
    fn failing_with(failures: Vec<SinkError>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            failures: Mutex::new(failures.into()),
        }
    }

    fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDlq {
    async fn publish(&self, entry: &DeadLetterEntry) -> Result<(), SinkError> {
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// Dedup store that reports the backend as unreachable for the first N
/// claim attempts, then behaves normally.
struct FlakyStore {
    inner: InMemoryDedupStore,
    claim_outages: AtomicU32,
}

impl FlakyStore {
    fn new(claim_outages: u32) -> Self {
        Self {
            inner: InMemoryDedupStore::new(),
            claim_outages: AtomicU32::new(claim_outages),
        }
    }
}

#[async_trait]
impl DedupStore for FlakyStore {
    async fn try_claim(
        &self,
        event_id: &str,
        lease_ttl: Duration,
    ) -> DedupStoreResult<ClaimOutcome> {
        if self.claim_outages.load(Ordering::SeqCst) > 0 {
            self.claim_outages.fetch_sub(1, Ordering::SeqCst);
            return Err(DedupStoreError::Unavailable("connection refused".into()));
        }
        self.inner.try_claim(event_id, lease_ttl).await
    }

    async fn mark_done(
        &self,
        event_id: &str,
        token: &ClaimToken,
        ttl: Duration,
    ) -> DedupStoreResult<bool> {
        self.inner.mark_done(event_id, token, ttl).await
    }

    async fn mark_dead_lettered(
        &self,
        event_id: &str,
        token: &ClaimToken,
        ttl: Duration,
    ) -> DedupStoreResult<bool> {
        self.inner.mark_dead_lettered(event_id, token, ttl).await
    }

    async fn release(&self, event_id: &str, token: &ClaimToken) -> DedupStoreResult<()> {
        self.inner.release(event_id, token).await
    }
}

fn fast_settings(max_attempts: u32) -> RelaySettings {
    RelaySettings {
        policy: RetryPolicy {
            base: Duration::from_millis(2),
            max_delay: Duration::from_millis(10),
            max_attempts,
            jitter: false,
        },
        dedup_ttl: Duration::from_secs(60),
        lease_ttl: Duration::from_secs(5),
        in_progress_delay: Duration::from_millis(5),
    }
}

struct Pipeline {
    relay: Arc<Relay>,
    sink: Arc<ScriptedSink>,
    dlq: Arc<RecordingDlq>,
    // kept alive so retry sleeps are not mistaken for shutdown
    _shutdown_tx: watch::Sender<bool>,
}

fn pipeline(
    dedup: Arc<dyn DedupStore>,
    sink: ScriptedSink,
    dlq: RecordingDlq,
    max_attempts: u32,
) -> Pipeline {
    let sink = Arc::new(sink);
    let dlq = Arc::new(dlq);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = Arc::new(Relay::new(
        dedup,
        sink.clone(),
        dlq.clone(),
        fast_settings(max_attempts),
        shutdown_rx,
    ));

    Pipeline {
        relay,
        sink,
        dlq,
        _shutdown_tx: shutdown_tx,
    }
}

fn post_event(event_id: &str) -> FeedEvent {
    let mut event = FeedEvent::new(
        "content-service",
        ActivityPayload::Post(PostActivity {
            member_id: 7,
            post_id: 42,
            action: ActivityAction::Created,
        }),
    );
    event.event_id = event_id.to_string();
    event
}

fn raw(event: &FeedEvent, offset: i64) -> RawMessage {
    RawMessage {
        coords: EventCoordinates {
            topic: "member-activity-20260808".to_string(),
            partition: 0,
            offset,
        },
        payload: event_schema::encode(event).unwrap(),
    }
}

#[tokio::test]
async fn test_redelivered_event_reaches_sink_once() {
    let p = pipeline(
        Arc::new(InMemoryDedupStore::new()),
        ScriptedSink::default(),
        RecordingDlq::default(),
        5,
    );
    let event = post_event("e1");

    let first = p.relay.process(raw(&event, 10)).await.unwrap();
    let second = p.relay.process(raw(&event, 11)).await.unwrap();

    assert_eq!(
        first,
        RelayOutcome::Done {
            delivered: true,
            attempts: 0
        }
    );
    // The redelivery still reaches a committable terminal state
    assert_eq!(
        second,
        RelayOutcome::Done {
            delivered: false,
            attempts: 0
        }
    );
    assert_eq!(p.sink.delivered(), vec!["e1"]);
    assert!(p.dlq.entries().is_empty());
}

#[tokio::test]
async fn test_truncated_json_dead_letters_without_retry() {
    let p = pipeline(
        Arc::new(InMemoryDedupStore::new()),
        ScriptedSink::default(),
        RecordingDlq::default(),
        5,
    );

    let bytes = event_schema::encode(&post_event("e1")).unwrap();
    let msg = RawMessage {
        coords: EventCoordinates {
            topic: "member-activity-20260808".to_string(),
            partition: 0,
            offset: 3,
        },
        payload: bytes[..bytes.len() / 2].to_vec(),
    };

    let outcome = p.relay.process(msg).await.unwrap();

    assert_eq!(
        outcome,
        RelayOutcome::DeadLettered {
            class: FailureClass::Permanent,
            attempts: 0
        }
    );
    assert!(p.sink.delivered().is_empty());

    let entries = p.dlq.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].error_kind, FailureClass::Permanent);
    assert_eq!(entries[0].attempts, 0);
    assert!(entries[0].event_id.is_none());
    assert_eq!(entries[0].offset, 3);
}

#[tokio::test]
async fn test_newer_schema_version_dead_letters_as_permanent() {
    let p = pipeline(
        Arc::new(InMemoryDedupStore::new()),
        ScriptedSink::default(),
        RecordingDlq::default(),
        5,
    );

    let json = format!(
        r#"{{
            "event_id": "future-1",
            "schema_version": {},
            "produced_at": "2026-08-08T12:00:00Z",
            "kind": "post",
            "payload": {{"member_id": 1, "post_id": 2, "action": "created"}}
        }}"#,
        SCHEMA_VERSION + 1
    );
    let msg = RawMessage {
        coords: EventCoordinates {
            topic: "member-activity-20260808".to_string(),
            partition: 1,
            offset: 0,
        },
        payload: json.into_bytes(),
    };

    let outcome = p.relay.process(msg).await.unwrap();

    assert_eq!(
        outcome,
        RelayOutcome::DeadLettered {
            class: FailureClass::Permanent,
            attempts: 0
        }
    );
    assert!(p.sink.delivered().is_empty());
}

#[tokio::test]
async fn test_transient_sink_failures_retry_then_deliver() {
    let sink = ScriptedSink::failing_with(vec![
        SinkError::Unavailable("down".into()),
        SinkError::Timeout("slow".into()),
        SinkError::Unavailable("down".into()),
    ]);
    let p = pipeline(
        Arc::new(InMemoryDedupStore::new()),
        sink,
        RecordingDlq::default(),
        5,
    );

    let outcome = p.relay.process(raw(&post_event("e1"), 0)).await.unwrap();

    assert_eq!(
        outcome,
        RelayOutcome::Done {
            delivered: true,
            attempts: 3
        }
    );
    assert_eq!(p.sink.delivered(), vec!["e1"]);
    assert!(p.dlq.entries().is_empty());
}

#[tokio::test]
async fn test_transient_exhaustion_dead_letters() {
    // max_attempts=3 allows the initial try plus three retries
    let failures = (0..4)
        .map(|_| SinkError::Unavailable("down".into()))
        .collect();
    let p = pipeline(
        Arc::new(InMemoryDedupStore::new()),
        ScriptedSink::failing_with(failures),
        RecordingDlq::default(),
        3,
    );

    let outcome = p.relay.process(raw(&post_event("e1"), 0)).await.unwrap();

    assert_eq!(
        outcome,
        RelayOutcome::DeadLettered {
            class: FailureClass::Exhausted,
            attempts: 3
        }
    );
    assert!(p.sink.delivered().is_empty());

    let entries = p.dlq.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].error_kind, FailureClass::Exhausted);
    assert_eq!(entries[0].event_id.as_deref(), Some("e1"));
    assert_eq!(entries[0].original_payload["event_id"], "e1");
}

#[tokio::test]
async fn test_dead_lettered_event_skips_on_redelivery() {
    let failures = (0..4)
        .map(|_| SinkError::Unavailable("down".into()))
        .collect();
    let p = pipeline(
        Arc::new(InMemoryDedupStore::new()),
        ScriptedSink::failing_with(failures),
        RecordingDlq::default(),
        3,
    );
    let event = post_event("e1");

    let first = p.relay.process(raw(&event, 0)).await.unwrap();
    assert!(matches!(first, RelayOutcome::DeadLettered { .. }));

    // The terminal record makes the redelivery a cheap no-op: no second
    // dead letter, no late delivery.
    let second = p.relay.process(raw(&event, 1)).await.unwrap();
    assert_eq!(
        second,
        RelayOutcome::Done {
            delivered: false,
            attempts: 0
        }
    );
    assert!(p.sink.delivered().is_empty());
    assert_eq!(p.dlq.entries().len(), 1);
}

#[tokio::test]
async fn test_store_outage_recovers_before_budget() {
    let p = pipeline(
        Arc::new(FlakyStore::new(3)),
        ScriptedSink::default(),
        RecordingDlq::default(),
        5,
    );

    let outcome = p.relay.process(raw(&post_event("e1"), 0)).await.unwrap();

    assert_eq!(
        outcome,
        RelayOutcome::Done {
            delivered: true,
            attempts: 3
        }
    );
    assert_eq!(p.sink.delivered(), vec!["e1"]);
}

#[tokio::test]
async fn test_store_outage_never_treated_as_fresh_event() {
    // Outage longer than the whole retry budget: the message must
    // dead-letter as exhausted, not sneak past the dedup check.
    let p = pipeline(
        Arc::new(FlakyStore::new(10)),
        ScriptedSink::default(),
        RecordingDlq::default(),
        3,
    );

    let outcome = p.relay.process(raw(&post_event("e1"), 0)).await.unwrap();

    assert_eq!(
        outcome,
        RelayOutcome::DeadLettered {
            class: FailureClass::Exhausted,
            attempts: 3
        }
    );
    assert!(p.sink.delivered().is_empty());
}

#[tokio::test]
async fn test_concurrent_deliveries_single_forward() {
    let p = pipeline(
        Arc::new(InMemoryDedupStore::new()),
        ScriptedSink::default(),
        RecordingDlq::default(),
        5,
    );
    let event = post_event("contested");

    let (a, b) = tokio::join!(
        p.relay.process(raw(&event, 0)),
        p.relay.process(raw(&event, 1))
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // Exactly one claim wins; both deliveries still terminate committably.
    assert_eq!(p.sink.delivered(), vec!["contested"]);
    let delivered_flags = [&a, &b]
        .iter()
        .filter(|o| matches!(o, RelayOutcome::Done { delivered: true, .. }))
        .count();
    assert_eq!(delivered_flags, 1);
    assert!(matches!(a, RelayOutcome::Done { .. }));
    assert!(matches!(b, RelayOutcome::Done { .. }));
}

#[tokio::test]
async fn test_undeliverable_dead_letter_blocks_commit() {
    let dlq_failures = (0..10)
        .map(|_| SinkError::Unavailable("dlq down".into()))
        .collect();
    let p = pipeline(
        Arc::new(InMemoryDedupStore::new()),
        ScriptedSink::default(),
        RecordingDlq::failing_with(dlq_failures),
        3,
    );

    let msg = RawMessage {
        coords: EventCoordinates {
            topic: "member-activity-20260808".to_string(),
            partition: 0,
            offset: 9,
        },
        payload: b"not json at all".to_vec(),
    };

    let err = p.relay.process(msg).await.unwrap_err();
    assert!(matches!(err, RelayError::DeadLetter(_)));
}

#[tokio::test]
async fn test_shutdown_abandons_message_mid_retry() {
    let failures = (0..100)
        .map(|_| SinkError::Unavailable("down".into()))
        .collect();
    let sink = ScriptedSink::failing_with(failures);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = Arc::new(Relay::new(
        Arc::new(InMemoryDedupStore::new()),
        Arc::new(sink),
        Arc::new(RecordingDlq::default()),
        RelaySettings {
            policy: RetryPolicy {
                base: Duration::from_millis(200),
                max_delay: Duration::from_secs(1),
                max_attempts: 50,
                jitter: false,
            },
            ..fast_settings(50)
        },
        shutdown_rx,
    ));

    let event = post_event("e1");
    let handle = {
        let relay = relay.clone();
        let msg = raw(&event, 0);
        tokio::spawn(async move { relay.process(msg).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = shutdown_tx.send(true);

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(RelayError::ShuttingDown)));
}
