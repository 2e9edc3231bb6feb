//! Gateway binary.

use anyhow::Context;
use rxflow_core::bus::MessageBus;
use rxflow_gateway::{AppState, Config, router};
use rxflow_redpanda::RedpandaBus;
use rxflow_runtime::RpcClient;
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

    info!("starting gateway");

    let bus: Arc<dyn MessageBus> = Arc::new(
        RedpandaBus::builder()
            .brokers(&config.brokers)
            .build()
            .context("creating message bus")?,
    );

    let rpc = RpcClient::new(bus, config.reply_topic.clone())
        .await
        .context("subscribing to reply topic")?;
    let state = Arc::new(AppState::new(rpc, config.request_timeout));

    let app = router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(addr = %addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving http")?;

    info!("gateway stopped");
    Ok(())
}
