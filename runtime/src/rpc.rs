//! Request/reply over the asynchronous bus.
//!
//! `RpcClient` gives callers a synchronous-looking round-trip without
//! blocking any worker thread. One background consumer watches the reply
//! topic; each in-flight request parks a oneshot sender in a correlation
//! table and suspends on the receiving half until the correlated reply
//! arrives or the caller's timeout elapses.
//!
//! ```text
//! caller                      RpcClient                       bus
//!   │  request(topic, msg)        │                            │
//!   ├────────────────────────────►│ register oneshot           │
//!   │                             ├───────────────────────────►│ publish
//!   │        (suspended)          │                            │
//!   │                             │◄───────────────────────────┤ reply
//!   │◄────────────────────────────┤ wake by correlation id     │
//! ```
//!
//! # Timeout vs rejection
//!
//! A timeout means the round-trip failed: nothing is known about the
//! remote verdict. [`RpcError::Timeout`] is therefore a distinct variant
//! and must never be folded into an explicit negative reply by callers.
//!
//! # Duplicate replies
//!
//! The replying side is itself idempotent and may send the same reply
//! twice. The first one consumes the table entry; later duplicates find no
//! waiter and are dropped with a debug log.

use futures::StreamExt;
use rxflow_core::bus::{BusError, Disposition, MessageBus};
use rxflow_core::message::{CorrelationId, SerializedMessage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Errors from a request/reply round-trip.
#[derive(Error, Debug)]
pub enum RpcError {
    /// No correlated reply arrived within the timeout.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The underlying publish or subscription failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The reply consumer went away while a request was in flight.
    #[error("reply channel closed")]
    ChannelClosed,
}

type CorrelationTable = Arc<Mutex<HashMap<CorrelationId, oneshot::Sender<SerializedMessage>>>>;

/// Request/reply client over the bus.
///
/// Cheap per request: each round-trip allocates one oneshot channel. The
/// single background consumer is shared by all in-flight requests.
pub struct RpcClient {
    bus: Arc<dyn MessageBus>,
    reply_topic: String,
    pending: CorrelationTable,
    consumer: tokio::task::JoinHandle<()>,
}

impl RpcClient {
    /// Create a client listening for replies on `reply_topic`.
    ///
    /// The reply subscription is established before this returns, so a
    /// reply can never race the consumer's startup.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the reply topic cannot
    /// be subscribed.
    pub async fn new(
        bus: Arc<dyn MessageBus>,
        reply_topic: impl Into<String>,
    ) -> Result<Self, BusError> {
        let reply_topic = reply_topic.into();
        let pending: CorrelationTable = Arc::new(Mutex::new(HashMap::new()));

        let mut stream = bus.subscribe(&[reply_topic.as_str()]).await?;
        let table = Arc::clone(&pending);
        let topic = reply_topic.clone();
        let consumer = tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                match next {
                    Ok(delivery) => {
                        let message = delivery.message().clone();
                        // Replies carry no work of their own; settle
                        // immediately so the transport moves on.
                        delivery.settle(Disposition::Ack);
                        Self::route_reply(&table, message);
                    }
                    Err(e) => {
                        error!(topic = %topic, error = %e, "error on reply stream");
                    }
                }
            }
            warn!(topic = %topic, "reply stream ended");
        });

        Ok(Self {
            bus,
            reply_topic,
            pending,
            consumer,
        })
    }

    fn route_reply(table: &CorrelationTable, message: SerializedMessage) {
        let Some(correlation_id) = message.correlation_id() else {
            warn!(message_type = %message.message_type, "reply without correlation id dropped");
            return;
        };

        let waiter = match table.lock() {
            Ok(mut pending) => pending.remove(&correlation_id),
            Err(_) => None,
        };

        match waiter {
            Some(sender) => {
                let _ = sender.send(message);
            }
            None => {
                // Late or duplicate reply; the replier is idempotent so
                // this is expected under redelivery.
                debug!(correlation_id = %correlation_id, "reply with no waiter dropped");
            }
        }
    }

    /// The topic this client receives replies on.
    #[must_use]
    pub fn reply_topic(&self) -> &str {
        &self.reply_topic
    }

    /// Publish `message` to `topic` and await the correlated reply.
    ///
    /// The correlation id and this client's reply topic are stamped into
    /// the outgoing message's metadata.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Bus`] if the publish fails (the table entry is
    ///   cleaned up; nothing is in flight)
    /// - [`RpcError::Timeout`] if no correlated reply arrives in time
    /// - [`RpcError::ChannelClosed`] if the reply consumer died
    pub async fn request(
        &self,
        topic: &str,
        message: SerializedMessage,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> Result<SerializedMessage, RpcError> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            if pending.insert(correlation_id.clone(), tx).is_some() {
                warn!(correlation_id = %correlation_id, "replaced in-flight request with same correlation id");
            }
        }

        let message = message.with_correlation(&correlation_id, &self.reply_topic);
        if let Err(e) = self.bus.publish(topic, &message).await {
            self.forget(&correlation_id);
            return Err(RpcError::Bus(e));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.forget(&correlation_id);
                Err(RpcError::ChannelClosed)
            }
            Err(_) => {
                self.forget(&correlation_id);
                Err(RpcError::Timeout(timeout))
            }
        }
    }

    fn forget(&self, correlation_id: &CorrelationId) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(correlation_id);
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}
