//! Command dispatch for the prescription service.
//!
//! One handler consumes the `prescription-commands` topic: the creation
//! command goes through the idempotent flow; the rest is CRUD. Replies are
//! published to the topic named in the inbound message's metadata, carrying
//! the same correlation id back.

use async_trait::async_trait;
use rxflow_core::bus::{Disposition, MessageBus};
use rxflow_core::environment::Clock;
use rxflow_core::message::{Message, SerializedMessage};
use rxflow_core::prescription::{Prescription, PrescriptionId, UpdatePrescription};
use rxflow_core::protocol::{ApiResponse, PrescriptionCommand};
use rxflow_core::repository::{PrescriptionRepository, RepositoryError};
use rxflow_runtime::consumer::{HandlerError, MessageHandler};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::consumer::{ConsumeError, CreatePrescriptionFlow};

/// Handler for the prescription command topic.
pub struct PrescriptionHandler {
    flow: Arc<CreatePrescriptionFlow>,
    repository: Arc<dyn PrescriptionRepository>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
}

impl PrescriptionHandler {
    /// Wire up the handler.
    #[must_use]
    pub fn new(
        flow: Arc<CreatePrescriptionFlow>,
        repository: Arc<dyn PrescriptionRepository>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            flow,
            repository,
            bus,
            clock,
        }
    }

    /// Publish a reply to wherever the inbound message asked for one.
    async fn reply<R: Message + Serialize>(
        &self,
        inbound: &SerializedMessage,
        payload: &R,
    ) -> Result<(), HandlerError> {
        let Some(reply_topic) = inbound.reply_topic() else {
            debug!(message_type = %inbound.message_type, "no reply topic requested");
            return Ok(());
        };
        let Some(correlation_id) = inbound.correlation_id() else {
            debug!(message_type = %inbound.message_type, "no correlation id on inbound message");
            return Ok(());
        };

        let message =
            SerializedMessage::from_message(payload)?.with_correlation_id(&correlation_id);
        self.bus.publish(reply_topic, &message).await?;
        Ok(())
    }

    async fn handle_command(
        &self,
        inbound: &SerializedMessage,
        command: PrescriptionCommand,
    ) -> Result<Disposition, HandlerError> {
        match command {
            PrescriptionCommand::Create(create) => match self.flow.handle(create).await {
                Ok(outcome) => {
                    // Ack strictly after the outcome is durable; the reply
                    // may be re-sent on redelivery, which is harmless.
                    self.reply(inbound, &outcome).await?;
                    Ok(Disposition::Ack)
                }
                // Lock contention: no reply, no ack, let the transport
                // redeliver after its backoff.
                Err(ConsumeError::Contended) => Ok(Disposition::Requeue),
                Err(ConsumeError::Infrastructure(e)) => Err(e.into()),
            },
            PrescriptionCommand::FindAll => {
                let prescriptions = self.repository.find_all().await?;
                self.reply(inbound, &ApiResponse::ok(prescriptions)).await?;
                Ok(Disposition::Ack)
            }
            PrescriptionCommand::FindOne { id } => {
                let response = match self.repository.find(&id).await? {
                    Some(prescription) => ApiResponse::ok(prescription),
                    None => ApiResponse::err(format!("prescription {id} not found")),
                };
                self.reply(inbound, &response).await?;
                Ok(Disposition::Ack)
            }
            PrescriptionCommand::Update { id, update } => {
                let response = self.apply_update(&id, update).await?;
                self.reply(inbound, &response).await?;
                Ok(Disposition::Ack)
            }
            PrescriptionCommand::Delete { id } => {
                let response: ApiResponse<Prescription> = match self.repository.delete(&id).await {
                    Ok(()) => {
                        info!(id = %id, "prescription deleted");
                        ApiResponse::ok_message(format!("prescription {id} deleted"))
                    }
                    Err(RepositoryError::NotFound(e)) => ApiResponse::err(e),
                    Err(e) => return Err(e.into()),
                };
                self.reply(inbound, &response).await?;
                Ok(Disposition::Ack)
            }
        }
    }

    /// Update business fields through the lifecycle engine.
    ///
    /// Rejected prescriptions are immutable; that rule lives in the engine,
    /// not here and not in storage.
    async fn apply_update(
        &self,
        id: &PrescriptionId,
        update: UpdatePrescription,
    ) -> Result<ApiResponse<Prescription>, HandlerError> {
        let Some(mut prescription) = self.repository.find(id).await? else {
            return Ok(ApiResponse::err(format!("prescription {id} not found")));
        };

        match prescription.apply_update(update, self.clock.now()) {
            Ok(()) => {
                self.repository.update(&prescription).await?;
                Ok(ApiResponse::ok_with_message(
                    prescription,
                    "prescription updated",
                ))
            }
            // RejectedImmutable lands here: a business refusal, not a
            // processing error, so the delivery is still acknowledged.
            Err(e) => Ok(ApiResponse::err(e.to_string())),
        }
    }
}

#[async_trait]
impl MessageHandler for PrescriptionHandler {
    async fn handle(&self, message: &SerializedMessage) -> Result<Disposition, HandlerError> {
        let command: PrescriptionCommand = match message.decode() {
            Ok(command) => command,
            Err(e) => {
                // A message that never decodes will never decode; ack it
                // out of the way instead of requeueing forever.
                error!(message_type = %message.message_type, error = %e, "dropping undecodable command");
                return Ok(Disposition::Ack);
            }
        };

        self.handle_command(message, command).await
    }
}
