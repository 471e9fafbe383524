//! Relay Metrics
//!
//! Prometheus metrics for the ingestion relay.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::time::Duration;

static EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_events_total",
        "Messages that reached a terminal state (delivered/duplicate/dead_lettered)",
        &["outcome"]
    )
    .expect("Failed to register relay events metric")
});

static RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "relay_retries_total",
        "Transient failures that were retried with backoff"
    )
    .expect("Failed to register relay retries metric")
});

static IN_PROGRESS_WAITS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "relay_in_progress_waits_total",
        "Claim attempts deferred because another worker held the lease"
    )
    .expect("Failed to register relay in-progress waits metric")
});

static EVENT_STALENESS_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "relay_event_staleness_seconds",
        "Age of events at decode time (now - produced_at)",
        vec![0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 1800.0, 3600.0]
    )
    .expect("Failed to register relay staleness metric")
});

/// Record a terminal outcome (delivered/duplicate/dead_lettered)
pub fn record_outcome(outcome: &str) {
    EVENTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a backoff retry of a transient failure
pub fn record_retry() {
    RETRIES_TOTAL.inc();
}

/// Record a deferred claim re-check
pub fn record_in_progress_wait() {
    IN_PROGRESS_WAITS_TOTAL.inc();
}

/// Observe how old an event was when it was decoded
pub fn observe_staleness(age: Duration) {
    EVENT_STALENESS_SECONDS.observe(age.as_secs_f64());
}
