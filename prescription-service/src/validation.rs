//! The validation requester: a synchronous-looking practitioner check over
//! the asynchronous bus.
//!
//! The request is published with the creation attempt's idempotency key as
//! its correlation identifier; the caller suspends until the correlated
//! reply arrives or the configured timeout elapses. The replying side is
//! idempotent on the same key, so retried requests get identical replies.
//!
//! Timeout is its own outcome here: "the validator said no" and "we never
//! heard back" must stay distinguishable all the way into the stored
//! outcome payload.

use rxflow_core::bus::{BusError, MessageBus, topics};
use rxflow_core::message::{CorrelationId, SerializedMessage};
use rxflow_core::protocol::{ValidationReply, ValidationRequest};
use rxflow_runtime::{RpcClient, RpcError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from a validation round-trip.
#[derive(Error, Debug)]
pub enum ValidationRequestError {
    /// No correlated reply arrived before the bound.
    ///
    /// A terminal business outcome for the creation attempt (rejected with
    /// a timeout reason), not an infrastructure failure.
    #[error("validation timed out after {0:?}")]
    Timeout(Duration),

    /// The round-trip could not be carried out at all.
    ///
    /// Unlike a timeout, this is infrastructure: the attempt must requeue.
    #[error("validation transport failure: {0}")]
    Transport(String),
}

/// Issues validation requests and awaits correlated replies.
pub struct ValidationRequester {
    rpc: RpcClient,
    timeout: Duration,
}

impl ValidationRequester {
    /// Create a requester listening for replies on `reply_topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the reply subscription
    /// cannot be established.
    pub async fn new(
        bus: Arc<dyn MessageBus>,
        reply_topic: &str,
        timeout: Duration,
    ) -> Result<Self, BusError> {
        let rpc = RpcClient::new(bus, reply_topic).await?;
        Ok(Self { rpc, timeout })
    }

    /// Publish `request` and await the correlated reply.
    ///
    /// # Errors
    ///
    /// - [`ValidationRequestError::Timeout`] when the bound elapses
    /// - [`ValidationRequestError::Transport`] when publishing fails or the
    ///   reply cannot be decoded
    pub async fn request_validation(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationReply, ValidationRequestError> {
        let message = SerializedMessage::from_message(request)
            .map_err(|e| ValidationRequestError::Transport(e.to_string()))?;
        let correlation_id = CorrelationId::from_string(request.idempotency_key.as_str());

        tracing::debug!(
            idempotency_key = %request.idempotency_key,
            practitioner_id = %request.practitioner_id,
            "sending validation request"
        );

        let reply = self
            .rpc
            .request(
                topics::VALIDATION_REQUESTS,
                message,
                correlation_id,
                self.timeout,
            )
            .await
            .map_err(|e| match e {
                RpcError::Timeout(t) => ValidationRequestError::Timeout(t),
                other => ValidationRequestError::Transport(other.to_string()),
            })?;

        reply
            .decode::<ValidationReply>()
            .map_err(|e| ValidationRequestError::Transport(e.to_string()))
    }

    /// The bound on the round-trip wait.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}
