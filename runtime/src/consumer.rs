//! Generic message consumer with automatic reconnection.
//!
//! `MessageConsumer` owns the boilerplate every worker needs: subscribing
//! to bus topics, pulling deliveries, handing each to a handler, settling
//! the delivery with the handler's decision, reconnecting when the stream
//! drops, and exiting cleanly on shutdown.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     subscribe:
//!         loop {
//!             delivery = stream.next()
//!             disposition = handler.handle(message)
//!             delivery.settle(disposition)     // Ack or Requeue
//!             check shutdown signal
//!         }
//!     if connection lost: wait and retry
//! }
//! ```
//!
//! # Settlement is the error boundary
//!
//! A handler returning `Ok(disposition)` decides the settlement itself,
//! including `Requeue` for lock contention, which is a retry signal and not
//! an error. A handler returning `Err` is an infrastructure failure: the
//! consumer logs it and settles `Requeue` so the whole attempt reruns.
//! Either way the consumer keeps processing subsequent messages.

use futures::StreamExt;
use rxflow_core::bus::{Delivery, Disposition, MessageBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Boxed error type handlers may return for infrastructure failures.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Handler for processing deliveries.
///
/// Implementors decode the message, do the work, and return how the
/// delivery should be settled. Handlers must be idempotent: the bus is
/// at-least-once and a `Requeue`d message will come back.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one delivered message and decide its settlement.
    ///
    /// # Errors
    ///
    /// Return `Err` only for infrastructure failures; the consumer settles
    /// the delivery as `Requeue` and the attempt reruns on redelivery.
    async fn handle(
        &self,
        message: &rxflow_core::message::SerializedMessage,
    ) -> Result<Disposition, HandlerError>;
}

/// Generic bus consumer.
///
/// # Lifecycle
///
/// 1. Created via [`MessageConsumer::new`]
/// 2. Spawned as a background task via [`MessageConsumer::spawn`]
/// 3. Runs until a shutdown signal arrives on the broadcast channel
pub struct MessageConsumer {
    /// Consumer name, for logging and metrics.
    name: String,
    /// Topics to subscribe to.
    topics: Vec<String>,
    /// Bus to consume from.
    bus: Arc<dyn MessageBus>,
    /// Handler for each delivery.
    handler: Arc<dyn MessageHandler>,
    /// Shutdown signal receiver.
    shutdown: broadcast::Receiver<()>,
    /// Delay before retrying a failed subscription.
    retry_delay: Duration,
}

impl MessageConsumer {
    /// Create a new consumer with the default retry delay (5 seconds).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        bus: Arc<dyn MessageBus>,
        handler: Arc<dyn MessageHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            bus,
            handler,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Override the subscription retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, topics = ?self.topics, "message consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "message consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.bus.subscribe(&topics) => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, "subscribed to bus");
                            if self.process_stream(&mut stream).await.is_break() {
                                break;
                            }
                            warn!(
                                consumer = %self.name,
                                "delivery stream ended, resubscribing in {:?}",
                                self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "failed to subscribe, retrying in {:?}",
                                self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }

        info!(consumer = %self.name, "message consumer stopped");
    }

    /// Process deliveries until the stream ends or shutdown is requested.
    ///
    /// Returns `Break` on shutdown, `Continue` when the stream ended and
    /// the outer loop should resubscribe.
    async fn process_stream(
        &mut self,
        stream: &mut rxflow_core::bus::DeliveryStream,
    ) -> std::ops::ControlFlow<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "shutdown requested during processing");
                    return std::ops::ControlFlow::Break(());
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(delivery)) => self.dispatch(delivery).await,
                        Some(Err(e)) => {
                            error!(consumer = %self.name, error = %e, "error receiving delivery");
                            // Transport-level hiccup; keep pulling.
                        }
                        None => return std::ops::ControlFlow::Continue(()),
                    }
                }
            }
        }
    }

    async fn dispatch(&self, delivery: Delivery) {
        let message_type = delivery.message().message_type.clone();
        let disposition = match self.handler.handle(delivery.message()).await {
            Ok(disposition) => disposition,
            Err(e) => {
                error!(
                    consumer = %self.name,
                    message_type = %message_type,
                    error = %e,
                    "handler failed, requeueing delivery"
                );
                Disposition::Requeue
            }
        };

        match disposition {
            Disposition::Ack => {
                metrics::counter!("rxflow_messages_acked", "consumer" => self.name.clone())
                    .increment(1);
            }
            Disposition::Requeue => {
                metrics::counter!("rxflow_messages_requeued", "consumer" => self.name.clone())
                    .increment(1);
            }
        }
        delivery.settle(disposition);
    }
}
