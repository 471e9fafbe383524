//! Redis feed sink
//!
//! Appends each delivered event to the owning member's activity list,
//! `activity:member:{member_id}`, with a rolling retention TTL. Downstream
//! feed builders read these lists; the relay only ever appends.

use async_trait::async_trait;
use event_schema::FeedEvent;
use redis_utils::{with_timeout, SharedConnectionManager};
use std::time::Duration;
use tracing::debug;

use super::{Ack, FeedSink, SinkError};

const KEY_PREFIX: &str = "activity:member:";

pub struct RedisFeedSink {
    redis: SharedConnectionManager,
    retention: Duration,
}

impl RedisFeedSink {
    pub fn new(redis: SharedConnectionManager, retention: Duration) -> Self {
        Self { redis, retention }
    }

    fn key(member_id: i64) -> String {
        format!("{}{}", KEY_PREFIX, member_id)
    }
}

#[async_trait]
impl FeedSink for RedisFeedSink {
    async fn forward(&self, event: &FeedEvent) -> Result<Ack, SinkError> {
        let payload =
            event_schema::encode(event).map_err(|e| SinkError::Rejected(e.to_string()))?;
        let key = Self::key(event.member_id());
        let retention_secs = self.retention.as_secs() as i64;

        let mut conn = self.redis.lock().await.clone();
        let (len, _): (i64, i64) = with_timeout(
            redis::pipe()
                .rpush(&key, payload)
                .expire(&key, retention_secs)
                .query_async(&mut conn),
        )
        .await
        .map_err(|e| {
            if e.is_timeout() {
                SinkError::Timeout(e.to_string())
            } else {
                SinkError::Unavailable(e.to_string())
            }
        })?;

        debug!(
            event_id = %event.event_id,
            member_id = event.member_id(),
            list_len = len,
            "activity appended to member list"
        );

        Ok(Ack {
            detail: Some(format!("{}[{}]", key, len)),
        })
    }
}
