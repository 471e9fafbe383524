use anyhow::{Context, Result};
use event_schema::DateBasedTopic;
use resilience::RetryPolicy;
use std::time::Duration;

/// Service configuration, resolved from the environment with defaults for
/// local development.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub kafka: KafkaConfig,
    pub redis: RedisConfig,
    pub dedup: DedupConfig,
    pub retry: RetryConfig,
    pub sink: SinkConfig,
    /// Number of consumer workers sharing the consumer group
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    /// Which date-based topic family this relay consumes
    pub topic: DateBasedTopic,
    pub dlq_topic: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Retention of terminal dedup records; bounds the exactly-once window
    pub dedup_ttl: Duration,
    /// Lifetime of a processing lease
    pub lease_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Fixed re-check delay while another worker holds the lease
    pub in_progress_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Retention of per-member activity lists written by the Redis sink
    pub retention: Duration,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Ok(RelayConfig {
            kafka: KafkaConfig {
                brokers: env_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
                group_id: env_or("KAFKA_GROUP_ID", "member-activity-consumer-group"),
                topic: parse_topic(&env_or("ACTIVITY_TOPIC", "member-activity"))?,
                dlq_topic: env_or("ACTIVITY_DLQ_TOPIC", "member-activity-dlq"),
            },
            redis: RedisConfig {
                url: env_or("REDIS_URL", "redis://localhost:6379"),
            },
            dedup: DedupConfig {
                dedup_ttl: duration_env_secs("DEDUP_TTL_SECS", 24 * 3600)?,
                lease_ttl: duration_env_ms("DEDUP_LEASE_TTL_MS", 30_000)?,
            },
            retry: RetryConfig {
                base: duration_env_ms("RETRY_BASE_MS", 100)?,
                max_delay: duration_env_ms("RETRY_MAX_MS", 10_000)?,
                max_attempts: parse_env("RETRY_MAX_ATTEMPTS", 5)?,
                in_progress_delay: duration_env_ms("IN_PROGRESS_DELAY_MS", 250)?,
            },
            sink: SinkConfig {
                retention: duration_env_secs("ACTIVITY_RETENTION_SECS", 24 * 3600)?,
            },
            concurrency: parse_env("RELAY_CONCURRENCY", 3)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.base,
            self.retry.max_delay,
            self.retry.max_attempts,
        )
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {}", key)),
        Err(_) => Ok(default),
    }
}

fn duration_env_ms(key: &str, default_ms: u64) -> Result<Duration> {
    Ok(Duration::from_millis(parse_env(key, default_ms)?))
}

fn duration_env_secs(key: &str, default_secs: u64) -> Result<Duration> {
    Ok(Duration::from_secs(parse_env(key, default_secs)?))
}

fn parse_topic(raw: &str) -> Result<DateBasedTopic> {
    match raw {
        "member-activity" => Ok(DateBasedTopic::MemberActivity),
        "post-activity" => Ok(DateBasedTopic::PostActivity),
        other => anyhow::bail!("unknown activity topic family: {}", other),
    }
}
