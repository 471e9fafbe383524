//! Dead Letter Queue publisher
//!
//! Forwards messages the relay gave up on to a Kafka DLQ topic, keeping the
//! original payload and the accumulated error context for inspection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, error};

use crate::sinks::{DeadLetterEntry, DeadLetterSink, SinkError};

#[derive(Debug, Clone)]
pub struct DlqConfig {
    pub brokers: String,
    pub topic: String,
    /// Message send timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "member-activity-dlq".to_string(),
            timeout_ms: 5000,
        }
    }
}

pub struct DlqPublisher {
    config: DlqConfig,
    producer: FutureProducer,
}

impl DlqPublisher {
    pub fn new(config: DlqConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.timeout_ms.to_string())
            .set("queue.buffering.max.messages", "10000")
            .create()
            .context("Failed to create Kafka producer for DLQ")?;

        Ok(Self { config, producer })
    }

    fn message_key(entry: &DeadLetterEntry) -> String {
        match &entry.event_id {
            Some(event_id) => event_id.clone(),
            None => format!("{}-{}-{}", entry.topic, entry.partition, entry.offset),
        }
    }
}

#[async_trait]
impl DeadLetterSink for DlqPublisher {
    async fn publish(&self, entry: &DeadLetterEntry) -> Result<(), SinkError> {
        let payload = serde_json::to_string(entry)
            .map_err(|e| SinkError::Rejected(format!("unserializable dead letter: {}", e)))?;
        let key = Self::message_key(entry);

        let record = FutureRecord::to(&self.config.topic)
            .key(&key)
            .payload(&payload);

        match self
            .producer
            .send(record, Duration::from_millis(self.config.timeout_ms))
            .await
        {
            Ok((partition, offset)) => {
                debug!(
                    topic = %self.config.topic,
                    partition,
                    offset,
                    key = %key,
                    error_kind = %entry.error_kind,
                    "dead letter published"
                );
                Ok(())
            }
            Err((e, _)) => {
                error!(
                    topic = %self.config.topic,
                    key = %key,
                    error = %e,
                    "failed to publish dead letter"
                );
                Err(SinkError::Unavailable(e.to_string()))
            }
        }
    }
}
