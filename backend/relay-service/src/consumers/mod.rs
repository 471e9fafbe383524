//! Kafka consumer workers
//!
//! Each worker owns its own `StreamConsumer` inside the shared consumer
//! group, so the group coordinator hands every partition to exactly one
//! worker and per-partition fetch order is preserved. A worker drives each
//! message to a terminal state through the relay and only then commits its
//! offset, which keeps commits in-order and gap-free within a partition.
//!
//! The same `event_id` can still surface on two workers at once (producer
//! re-keying, rebalances); that race belongs to the dedup store's claim
//! protocol, not to anything in here.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::relay::{EventCoordinates, RawMessage, Relay};

pub struct ActivityConsumer {
    consumer: StreamConsumer,
    relay: Arc<Relay>,
    worker_id: usize,
    shutdown: watch::Receiver<bool>,
}

impl ActivityConsumer {
    pub fn new(
        config: &RelayConfig,
        relay: Arc<Relay>,
        worker_id: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        // Manual commits: an offset only moves after its message reached a
        // terminal state. Auto-commit would acknowledge messages we have
        // not finished (or even started) processing.
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka.brokers)
            .set("group.id", &config.kafka.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("isolation.level", "read_committed")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "10000")
            .set("max.poll.interval.ms", "300000")
            .create()
            .map_err(|e| RelayError::Kafka(format!("failed to create consumer: {}", e)))?;

        let pattern = config.kafka.topic.subscription_pattern();
        consumer
            .subscribe(&[&pattern])
            .map_err(|e| RelayError::Kafka(format!("failed to subscribe to {}: {}", pattern, e)))?;

        info!(worker_id, pattern = %pattern, "consumer subscribed");

        Ok(Self {
            consumer,
            relay,
            worker_id,
            shutdown,
        })
    }

    /// Consume until shutdown. Never returns on message-level failures;
    /// those either retry inside the relay or land on the DLQ.
    pub async fn run(mut self) {
        info!(worker_id = self.worker_id, "consumer worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                msg = self.consumer.recv() => match msg {
                    Ok(m) => self.handle(&m).await,
                    Err(e) => {
                        warn!(worker_id = self.worker_id, error = %e, "kafka consumer error");
                        // brief pause so a broken broker connection does
                        // not spin this loop
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }

            if *self.shutdown.borrow() {
                break;
            }
        }

        info!(worker_id = self.worker_id, "consumer worker drained");
    }

    async fn handle(&self, m: &BorrowedMessage<'_>) {
        let raw = RawMessage {
            coords: EventCoordinates {
                topic: m.topic().to_string(),
                partition: m.partition(),
                offset: m.offset(),
            },
            payload: m.payload().map(|p| p.to_vec()).unwrap_or_default(),
        };
        let coords = raw.coords.clone();

        match self.relay.process(raw).await {
            Ok(outcome) => {
                // Terminal state reached; the cursor may advance.
                if let Err(e) = self.consumer.commit_message(m, CommitMode::Async) {
                    warn!(coords = %coords, error = %e, "offset commit failed");
                }
                tracing::debug!(coords = %coords, ?outcome, "message finished");
            }
            Err(RelayError::ShuttingDown) => {
                info!(coords = %coords, "message abandoned mid-retry for shutdown, will be redelivered");
            }
            Err(e) => {
                error!(
                    coords = %coords,
                    error = %e,
                    "message did not reach a terminal state, leaving offset uncommitted"
                );
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Spawn the configured number of workers into the shared consumer group.
pub fn spawn_workers(
    config: &RelayConfig,
    relay: Arc<Relay>,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(config.concurrency);

    for worker_id in 0..config.concurrency {
        let worker = ActivityConsumer::new(config, relay.clone(), worker_id, shutdown.clone())?;
        handles.push(tokio::spawn(worker.run()));
    }

    info!(workers = config.concurrency, "consumer workers spawned");
    Ok(handles)
}
