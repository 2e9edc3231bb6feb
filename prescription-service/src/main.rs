//! Prescription service binary.
//!
//! Startup order: configuration → tracing → Postgres (schema ensured) →
//! Redis coordination handle → bus → validation requester → consumer.
//! Shutdown is coordinated through a broadcast channel on ctrl-c.

use anyhow::Context;
use rxflow_core::bus::{MessageBus, topics};
use rxflow_core::environment::SystemClock;
use rxflow_prescription_service::{
    Config, CreatePrescriptionFlow, PrescriptionHandler, ValidationRequester,
};
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

    info!("starting prescription service");

    let pool = rxflow_postgres::connect(&config.database_url, config.database_max_connections)
        .await
        .context("connecting to postgres")?;
    let repository = Arc::new(rxflow_postgres::PostgresPrescriptionRepository::new(pool));
    repository
        .ensure_schema()
        .await
        .context("ensuring prescription schema")?;

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

    let requester = Arc::new(
        ValidationRequester::new(
            Arc::clone(&bus),
            &config.validation_reply_topic,
            config.validation_timeout,
        )
        .await
        .context("subscribing to validation replies")?,
    );

    let clock: Arc<dyn rxflow_core::environment::Clock> = Arc::new(SystemClock);
    let repository: Arc<dyn rxflow_core::repository::PrescriptionRepository> = repository;
    let flow = Arc::new(CreatePrescriptionFlow::new(
        Arc::new(redis.idempotency_store()),
        Arc::new(redis.lock()),
        Arc::clone(&repository),
        requester,
        Arc::clone(&clock),
        config.lock_ttl,
        config.outcome_retention,
    ));

    let handler = Arc::new(PrescriptionHandler::new(
        flow,
        repository,
        Arc::clone(&bus),
        clock,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let consumer = MessageConsumer::new(
        "prescription-commands",
        vec![topics::PRESCRIPTION_COMMANDS.to_string()],
        bus,
        handler,
        shutdown_rx,
    );
    let consumer_handle = consumer.spawn();

    info!("prescription service ready, idempotent consumer active");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    consumer_handle.await.context("waiting for consumer")?;

    info!("prescription service stopped");
    Ok(())
}
