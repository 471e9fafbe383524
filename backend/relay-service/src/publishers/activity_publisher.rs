//! Activity event publisher
//!
//! Producer half of the module: other dailyfeed services use this to put
//! activity events on the wire. The concrete topic is resolved from the
//! event's `produced_at` day, and the message key is the `event_id` so
//! redeliveries land on the same partition as the original.

use anyhow::{Context, Result};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, error};

use event_schema::{DateBasedTopic, FeedEvent};

#[derive(Debug, Clone)]
pub struct ActivityPublisherConfig {
    pub brokers: String,
    pub topic: DateBasedTopic,
    /// Message send timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for ActivityPublisherConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: DateBasedTopic::MemberActivity,
            timeout_ms: 5000,
        }
    }
}

pub struct ActivityPublisher {
    config: ActivityPublisherConfig,
    producer: FutureProducer,
}

impl ActivityPublisher {
    pub fn new(config: ActivityPublisherConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.timeout_ms.to_string())
            .set("queue.buffering.max.messages", "10000")
            .set("batch.num.messages", "1000")
            .create()
            .context("Failed to create Kafka producer for activity events")?;

        Ok(Self { config, producer })
    }

    /// Publish one event to its day's topic. Events without an ID are
    /// refused: the ID is both the message key and the idempotency key, and
    /// a keyless event can never be deduplicated downstream.
    pub async fn publish(&self, event: &FeedEvent) -> Result<(i32, i64)> {
        if event.event_id.is_empty() {
            anyhow::bail!("refusing to publish event without an event_id");
        }

        let topic = self.config.topic.topic_name(event.produced_at);
        let payload = event_schema::encode(event).context("Failed to serialize activity event")?;

        let record = FutureRecord::to(&topic)
            .key(&event.event_id)
            .payload(&payload);

        match self
            .producer
            .send(record, Duration::from_millis(self.config.timeout_ms))
            .await
        {
            Ok((partition, offset)) => {
                debug!(
                    topic = %topic,
                    partition,
                    offset,
                    event_id = %event.event_id,
                    kind = event.kind(),
                    "activity event published"
                );
                Ok((partition, offset))
            }
            Err((e, _)) => {
                error!(
                    topic = %topic,
                    event_id = %event.event_id,
                    error = %e,
                    "failed to publish activity event"
                );
                Err(anyhow::anyhow!("Kafka send error: {}", e))
            }
        }
    }
}
