//! Practitioner service binary.

use anyhow::Context;
use rxflow_core::bus::{MessageBus, topics};
use rxflow_core::environment::SystemClock;
use rxflow_practitioner_service::{Config, PractitionerHandler};
use rxflow_redis::RedisCoordination;
use rxflow_redpanda::RedpandaBus;
use rxflow_runtime::MessageConsumer;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    info!("starting practitioner service");

    let pool = rxflow_postgres::connect(&config.database_url, config.database_max_connections)
        .await
        .context("connecting to postgres")?;
    let repository = Arc::new(rxflow_postgres::PostgresPractitionerRepository::new(pool));
    repository
        .ensure_schema()
        .await
        .context("ensuring practitioner schema")?;

    let redis = RedisCoordination::connect(&config.redis_url)
        .await
        .context("connecting to redis")?;

    let bus: Arc<dyn MessageBus> = Arc::new(
        RedpandaBus::builder()
            .brokers(&config.brokers)
            .consumer_group(&config.consumer_group)
            .build()
            .context("creating message bus")?,
    );

    let handler = Arc::new(PractitionerHandler::new(
        repository,
        Arc::new(redis.idempotency_store()),
        Arc::clone(&bus),
        Arc::new(SystemClock),
        config.reply_retention,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let consumer = MessageConsumer::new(
        "practitioner-commands",
        vec![
            topics::PRACTITIONER_COMMANDS.to_string(),
            topics::VALIDATION_REQUESTS.to_string(),
        ],
        bus,
        handler,
        shutdown_rx,
    );
    let consumer_handle = consumer.spawn();

    info!("practitioner service ready");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    consumer_handle.await.context("waiting for consumer")?;

    info!("practitioner service stopped");
    Ok(())
}
