//! Redis implementation of the claim protocol
//!
//! Record layout: one string key per event, value encodes status + detail.
//!
//! ```text
//! activity:dedup:{event_id} = "lease:<uuid>"   held claim, PX = lease TTL
//!                           | "done:<ms>"      processed,  PX = dedup TTL
//!                           | "dead:<ms>"      dead-lettered, PX = dedup TTL
//! ```
//!
//! Each operation is one Lua script invocation so the check and the write
//! happen in the same Redis command slot. SET NX alone cannot distinguish
//! "done long ago" from "another worker is on it right now", which is why
//! the scripts inspect the value prefix.

use chrono::Utc;
use once_cell::sync::Lazy;
use redis::Script;
use redis_utils::{with_timeout, SharedConnectionManager};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::DedupStoreResult;
use crate::{validate_event_id, ClaimOutcome, ClaimToken, DedupStore};

const DEFAULT_KEY_PREFIX: &str = "activity:dedup:";

const DONE_PREFIX: &str = "done:";
const DEAD_PREFIX: &str = "dead:";

static TRY_CLAIM: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local v = redis.call('GET', KEYS[1])
        if not v then
            redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
            return 'claimed'
        end
        if string.sub(v, 1, 5) == 'done:' or string.sub(v, 1, 5) == 'dead:' then
            return 'done'
        end
        return 'pending'
        "#,
    )
});

static MARK_TERMINAL: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local v = redis.call('GET', KEYS[1])
        if v == ARGV[1] then
            redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
            return 1
        end
        if v and string.sub(v, 1, 5) == string.sub(ARGV[2], 1, 5) then
            return 1
        end
        return 0
        "#,
    )
});

static RELEASE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        end
        return 0
        "#,
    )
});

#[derive(Clone)]
pub struct RedisDedupStore {
    redis: SharedConnectionManager,
    key_prefix: String,
}

impl RedisDedupStore {
    pub fn new(redis: SharedConnectionManager) -> Self {
        Self::with_key_prefix(redis, DEFAULT_KEY_PREFIX)
    }

    pub fn with_key_prefix(redis: SharedConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, event_id: &str) -> String {
        format!("{}{}", self.key_prefix, event_id)
    }

    async fn mark(
        &self,
        event_id: &str,
        token: &ClaimToken,
        status_prefix: &str,
        ttl: Duration,
    ) -> DedupStoreResult<bool> {
        validate_event_id(event_id)?;

        let key = self.key(event_id);
        let terminal = format!("{}{}", status_prefix, Utc::now().timestamp_millis());

        let mut conn = self.redis.lock().await.clone();
        let marked = with_timeout(
            MARK_TERMINAL
                .key(&key)
                .arg(token.as_str())
                .arg(&terminal)
                .arg(ttl.as_millis() as u64)
                .invoke_async::<_, i64>(&mut conn),
        )
        .await?;

        if marked == 1 {
            debug!(event_id, status = status_prefix, "dedup record finalized");
        } else {
            warn!(
                event_id,
                status = status_prefix,
                "lease lost before terminal transition"
            );
        }

        Ok(marked == 1)
    }
}

#[async_trait::async_trait]
impl DedupStore for RedisDedupStore {
    async fn try_claim(
        &self,
        event_id: &str,
        lease_ttl: Duration,
    ) -> DedupStoreResult<ClaimOutcome> {
        validate_event_id(event_id)?;

        let key = self.key(event_id);
        let token = ClaimToken::generate();

        let mut conn = self.redis.lock().await.clone();
        let outcome = with_timeout(
            TRY_CLAIM
                .key(&key)
                .arg(token.as_str())
                .arg(lease_ttl.as_millis() as u64)
                .invoke_async::<_, String>(&mut conn),
        )
        .await?;

        match outcome.as_str() {
            "claimed" => {
                debug!(event_id, "claimed event for processing");
                Ok(ClaimOutcome::Claimed(token))
            }
            "done" => {
                debug!(event_id, "event already processed, skipping");
                Ok(ClaimOutcome::AlreadyDone)
            }
            _ => {
                debug!(event_id, "event claimed by another worker");
                Ok(ClaimOutcome::AlreadyInProgress)
            }
        }
    }

    async fn mark_done(
        &self,
        event_id: &str,
        token: &ClaimToken,
        ttl: Duration,
    ) -> DedupStoreResult<bool> {
        self.mark(event_id, token, DONE_PREFIX, ttl).await
    }

    async fn mark_dead_lettered(
        &self,
        event_id: &str,
        token: &ClaimToken,
        ttl: Duration,
    ) -> DedupStoreResult<bool> {
        self.mark(event_id, token, DEAD_PREFIX, ttl).await
    }

    async fn release(&self, event_id: &str, token: &ClaimToken) -> DedupStoreResult<()> {
        validate_event_id(event_id)?;

        let key = self.key(event_id);

        let mut conn = self.redis.lock().await.clone();
        let deleted = with_timeout(
            RELEASE
                .key(&key)
                .arg(token.as_str())
                .invoke_async::<_, i64>(&mut conn),
        )
        .await?;

        if deleted > 0 {
            debug!(event_id, "released claim");
        } else {
            debug!(event_id, "claim already gone at release");
        }

        Ok(())
    }
}
