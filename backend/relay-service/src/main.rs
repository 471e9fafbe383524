use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dedup_store::RedisDedupStore;
use redis_utils::RedisPool;
use relay_service::config::RelayConfig;
use relay_service::consumers;
use relay_service::publishers::{DlqConfig, DlqPublisher};
use relay_service::relay::{Relay, RelaySettings};
use relay_service::sinks::RedisFeedSink;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relay_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting relay-service");

    let config = RelayConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(
        brokers = %config.kafka.brokers,
        group_id = %config.kafka.group_id,
        workers = config.concurrency,
        "configuration loaded"
    );

    let redis = RedisPool::connect(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;

    let dedup = Arc::new(RedisDedupStore::new(redis.manager()));
    let sink = Arc::new(RedisFeedSink::new(redis.manager(), config.sink.retention));
    let dead_letters = Arc::new(
        DlqPublisher::new(DlqConfig {
            brokers: config.kafka.brokers.clone(),
            topic: config.kafka.dlq_topic.clone(),
            ..DlqConfig::default()
        })
        .context("Failed to create DLQ publisher")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = Arc::new(Relay::new(
        dedup,
        sink,
        dead_letters,
        RelaySettings {
            policy: config.retry_policy(),
            dedup_ttl: config.dedup.dedup_ttl,
            lease_ttl: config.dedup.lease_ttl,
            in_progress_delay: config.retry.in_progress_delay,
        },
        shutdown_rx.clone(),
    ));

    let workers = consumers::spawn_workers(&config, relay, shutdown_rx)
        .context("Failed to start consumer workers")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown signal received, draining workers");
    let _ = shutdown_tx.send(true);

    for worker in workers {
        let _ = worker.await;
    }

    tracing::info!("relay-service stopped");
    Ok(())
}
