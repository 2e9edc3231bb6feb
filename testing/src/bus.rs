//! In-memory message bus.
//!
//! Mirrors the production transport's semantics closely enough for the
//! coordination tests to be meaningful:
//!
//! - every subscriber to a topic receives every message published to it
//! - each subscription hands out one delivery at a time and waits for its
//!   settlement before the next (prefetch of one)
//! - a `Requeue`d (or dropped) delivery is redelivered to the same
//!   subscription after a short delay, approximating broker backoff
//!
//! The bus also counts publishes per topic, which is how tests assert
//! single-flight ("exactly one validation round-trip was issued").

use rxflow_core::bus::{BusError, Delivery, DeliveryStream, Disposition, MessageBus};
use rxflow_core::message::SerializedMessage;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Delay before a requeued message is redelivered.
const REDELIVERY_DELAY: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Registry {
    /// Subscriber queues per topic.
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<SerializedMessage>>>,
    /// Messages published per topic.
    published: HashMap<String, usize>,
}

/// In-memory [`MessageBus`] for tests.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    registry: Arc<Mutex<Registry>>,
}

impl InMemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many messages have been published to `topic`.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned (test-only code).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn published_count(&self, topic: &str) -> usize {
        self.registry
            .lock()
            .unwrap()
            .published
            .get(topic)
            .copied()
            .unwrap_or(0)
    }
}

impl MessageBus for InMemoryBus {
    fn publish(
        &self,
        topic: &str,
        message: &SerializedMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = message.clone();
        Box::pin(async move {
            let mut registry = self
                .registry
                .lock()
                .map_err(|_| BusError::Transport("bus registry poisoned".to_string()))?;
            *registry.published.entry(topic.clone()).or_insert(0) += 1;

            match registry.subscribers.get_mut(&topic) {
                Some(queues) => {
                    queues.retain(|queue| queue.send(message.clone()).is_ok());
                }
                None => {
                    debug!(topic = %topic, "message published to topic with no subscribers");
                }
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        Box::pin(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            {
                let mut registry = self
                    .registry
                    .lock()
                    .map_err(|_| BusError::Transport("bus registry poisoned".to_string()))?;
                for topic in &topics {
                    registry
                        .subscribers
                        .entry(topic.clone())
                        .or_default()
                        .push(tx.clone());
                }
            }

            // The subscription keeps a sender to itself so requeued
            // deliveries come back to this subscriber only.
            let redelivery_tx = tx;
            let stream = async_stream::stream! {
                loop {
                    let Some(message) = rx.recv().await else { break };

                    let (receipt_tx, receipt_rx) = oneshot::channel();
                    yield Ok(Delivery::new(message.clone(), receipt_tx));

                    // Prefetch of one: wait for settlement before pulling
                    // the next message.
                    match receipt_rx.await {
                        Ok(Disposition::Ack) => {}
                        Ok(Disposition::Requeue) | Err(_) => {
                            tokio::time::sleep(REDELIVERY_DELAY).await;
                            let _ = redelivery_tx.send(message);
                        }
                    }
                }
            };
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}
