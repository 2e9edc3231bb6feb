//! Message bus abstraction with per-delivery settlement.
//!
//! The bus provides at-least-once delivery: a message may arrive more than
//! once, and concurrent deliveries of the same logical message are possible
//! across workers. What makes the platform safe on top of that is the
//! combination of the idempotency layer and the explicit settlement
//! decision each handler returns.
//!
//! # Settlement
//!
//! Every [`Delivery`] must be settled with a [`Disposition`]:
//!
//! - [`Disposition::Ack`]: the work is durably recorded; the transport may
//!   forget the message.
//! - [`Disposition::Requeue`]: processing did not complete (lock
//!   contention, infrastructure failure); the transport redelivers after
//!   its own backoff.
//!
//! Dropping a delivery without settling it counts as `Requeue`: a crashed
//! or panicking handler must never ack implicitly.
//!
//! Transports deliver at most one unsettled message per subscription
//! (prefetch of one), so a single worker's throughput is serialized while
//! horizontal scaling comes from running more workers.
//!
//! # Implementations
//!
//! - `InMemoryBus` (rxflow-testing): for tests; requeued deliveries are
//!   redelivered immediately
//! - `RedpandaBus` (rxflow-redpanda): production, Kafka-compatible; ack
//!   commits the offset, requeue seeks back

use crate::message::SerializedMessage;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to connect to the broker.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic.
    #[error("publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// Network or transport error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// How a delivery is settled back to the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The outcome is durably recorded; discard the message.
    Ack,
    /// Processing did not complete; redeliver after the transport's backoff.
    Requeue,
}

/// A single in-flight delivery awaiting settlement.
///
/// The transport holds the receiving half of the settlement channel and
/// will not hand out the next message on this subscription until this one
/// is settled (or dropped, which settles as [`Disposition::Requeue`]).
#[derive(Debug)]
pub struct Delivery {
    message: SerializedMessage,
    receipt: Option<oneshot::Sender<Disposition>>,
}

impl Delivery {
    /// Create a delivery with a settlement channel.
    #[must_use]
    pub const fn new(message: SerializedMessage, receipt: oneshot::Sender<Disposition>) -> Self {
        Self {
            message,
            receipt: Some(receipt),
        }
    }

    /// The delivered message.
    #[must_use]
    pub const fn message(&self) -> &SerializedMessage {
        &self.message
    }

    /// Settle this delivery.
    ///
    /// Settling twice is impossible by construction; the settlement channel
    /// is consumed on first use.
    pub fn settle(mut self, disposition: Disposition) {
        if let Some(receipt) = self.receipt.take() {
            let _ = receipt.send(disposition);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        // An unsettled drop means the handler bailed out; never ack work
        // that was not completed.
        if let Some(receipt) = self.receipt.take() {
            let _ = receipt.send(Disposition::Requeue);
        }
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BusError>> + Send>>;

/// Trait for message bus implementations.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so
/// the bus can be held as `Arc<dyn MessageBus>` by consumers, RPC clients,
/// and handlers alike.
pub trait MessageBus: Send + Sync {
    /// Publish a message to a topic.
    ///
    /// At-least-once semantics: the message may reach subscribers more than
    /// once, so handlers must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the publish fails.
    fn publish(
        &self,
        topic: &str,
        message: &SerializedMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BusError>> + Send + '_>>;
}

/// Well-known topic names.
///
/// One command topic per owning service, one topic per direction of the
/// validation exchange, and a reply topic for the gateway's round-trips.
pub mod topics {
    /// Commands addressed to the prescription service.
    pub const PRESCRIPTION_COMMANDS: &str = "prescription-commands";
    /// Commands addressed to the practitioner service.
    pub const PRACTITIONER_COMMANDS: &str = "practitioner-commands";
    /// Practitioner validation requests.
    pub const VALIDATION_REQUESTS: &str = "validation-requests";
    /// Practitioner validation replies.
    pub const VALIDATION_REPLIES: &str = "validation-replies";
    /// Replies to gateway-initiated round-trips.
    pub const GATEWAY_REPLIES: &str = "gateway-replies";
}
