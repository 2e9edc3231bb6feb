//! Command dispatch and the validation responder.
//!
//! One handler consumes both the `practitioner-commands` topic (CRUD) and
//! the `validation-requests` topic. Validation is the interesting half:
//! the responder must be safe to receive the same request twice and reply
//! identically both times, which it guarantees by recording the reply
//! under the request's key before the first publish.

use async_trait::async_trait;
use rxflow_core::bus::{Disposition, MessageBus, topics};
use rxflow_core::environment::Clock;
use rxflow_core::idempotency::IdempotencyStore;
use rxflow_core::message::{CorrelationId, Message, SerializedMessage};
use rxflow_core::practitioner::{Practitioner, PractitionerId, UpdatePractitioner};
use rxflow_core::protocol::{
    ApiResponse, PractitionerCommand, ValidationReply, ValidationRequest, ValidationStatus,
};
use rxflow_core::repository::{PractitionerRepository, RepositoryError};
use rxflow_runtime::consumer::{HandlerError, MessageHandler};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Handler for practitioner commands and validation requests.
pub struct PractitionerHandler {
    repository: Arc<dyn PractitionerRepository>,
    store: Arc<dyn IdempotencyStore>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    reply_retention: Duration,
}

impl PractitionerHandler {
    /// Wire up the handler.
    #[must_use]
    pub fn new(
        repository: Arc<dyn PractitionerRepository>,
        store: Arc<dyn IdempotencyStore>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        reply_retention: Duration,
    ) -> Self {
        Self {
            repository,
            store,
            bus,
            clock,
            reply_retention,
        }
    }

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

    /// Answer a validation request, idempotently.
    ///
    /// The reply is recorded under `validate:<key>` *before* it is first
    /// published; any later duplicate of the same request replays the
    /// recorded reply instead of re-running the check.
    async fn handle_validation(
        &self,
        inbound: &SerializedMessage,
        request: ValidationRequest,
    ) -> Result<Disposition, HandlerError> {
        let replier_key = request.idempotency_key.validation_scope();

        let reply = if let Some(recorded) = self.store.get(&replier_key).await? {
            info!(key = %request.idempotency_key, "duplicate validation request, replaying reply");
            serde_json::from_value::<ValidationReply>(recorded)?
        } else {
            let (status, message) = match self.repository.find(&request.practitioner_id).await? {
                Some(practitioner) => (
                    ValidationStatus::Validated,
                    format!("practitioner {} validated", practitioner.id),
                ),
                None => (
                    ValidationStatus::Rejected,
                    format!("practitioner {} not found", request.practitioner_id),
                ),
            };

            let reply = ValidationReply {
                idempotency_key: request.idempotency_key.clone(),
                practitioner_id: request.practitioner_id,
                prescription_id: request.prescription_id,
                status,
                message,
            };

            self.store
                .put(
                    &replier_key,
                    &serde_json::to_value(&reply)?,
                    self.reply_retention,
                )
                .await?;
            info!(
                key = %request.idempotency_key,
                status = ?reply.status,
                "validation verdict recorded"
            );
            reply
        };

        let reply_topic = inbound.reply_topic().unwrap_or(topics::VALIDATION_REPLIES);
        let correlation_id = inbound
            .correlation_id()
            .unwrap_or_else(|| CorrelationId::from_string(reply.idempotency_key.as_str()));
        let message =
            SerializedMessage::from_message(&reply)?.with_correlation_id(&correlation_id);
        self.bus.publish(reply_topic, &message).await?;

        Ok(Disposition::Ack)
    }

    async fn handle_command(
        &self,
        inbound: &SerializedMessage,
        command: PractitionerCommand,
    ) -> Result<Disposition, HandlerError> {
        match command {
            PractitionerCommand::Create(create) => {
                let practitioner = Practitioner::from_create(create, self.clock.now());
                let response = match self.repository.insert(&practitioner).await {
                    Ok(()) => {
                        info!(id = %practitioner.id, "practitioner registered");
                        ApiResponse::ok_with_message(practitioner, "practitioner registered")
                    }
                    Err(RepositoryError::Conflict(e)) => ApiResponse::err(e),
                    Err(e) => return Err(e.into()),
                };
                self.reply(inbound, &response).await?;
                Ok(Disposition::Ack)
            }
            PractitionerCommand::FindAll => {
                let practitioners = self.repository.find_all().await?;
                self.reply(inbound, &ApiResponse::ok(practitioners)).await?;
                Ok(Disposition::Ack)
            }
            PractitionerCommand::FindOne { id } => {
                let response = match self.repository.find(&id).await? {
                    Some(practitioner) => ApiResponse::ok(practitioner),
                    None => ApiResponse::err(format!("practitioner {id} not found")),
                };
                self.reply(inbound, &response).await?;
                Ok(Disposition::Ack)
            }
            PractitionerCommand::Update { id, update } => {
                let response = self.apply_update(&id, update).await?;
                self.reply(inbound, &response).await?;
                Ok(Disposition::Ack)
            }
            PractitionerCommand::Delete { id } => {
                let response: ApiResponse<Practitioner> = match self.repository.delete(&id).await {
                    Ok(()) => {
                        info!(id = %id, "practitioner deleted");
                        ApiResponse::ok_message(format!("practitioner {id} deleted"))
                    }
                    Err(RepositoryError::NotFound(e)) => ApiResponse::err(e),
                    Err(e) => return Err(e.into()),
                };
                self.reply(inbound, &response).await?;
                Ok(Disposition::Ack)
            }
        }
    }

    async fn apply_update(
        &self,
        id: &PractitionerId,
        update: UpdatePractitioner,
    ) -> Result<ApiResponse<Practitioner>, HandlerError> {
        let Some(mut practitioner) = self.repository.find(id).await? else {
            return Ok(ApiResponse::err(format!("practitioner {id} not found")));
        };

        practitioner.apply_update(update, self.clock.now());
        match self.repository.update(&practitioner).await {
            Ok(()) => Ok(ApiResponse::ok_with_message(
                practitioner,
                "practitioner updated",
            )),
            Err(RepositoryError::Conflict(e)) => Ok(ApiResponse::err(e)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl MessageHandler for PractitionerHandler {
    async fn handle(&self, message: &SerializedMessage) -> Result<Disposition, HandlerError> {
        if message.message_type.starts_with("validation.request") {
            match message.decode::<ValidationRequest>() {
                Ok(request) => return self.handle_validation(message, request).await,
                Err(e) => {
                    error!(error = %e, "dropping undecodable validation request");
                    return Ok(Disposition::Ack);
                }
            }
        }

        match message.decode::<PractitionerCommand>() {
            Ok(command) => self.handle_command(message, command).await,
            Err(e) => {
                error!(message_type = %message.message_type, error = %e, "dropping undecodable command");
                Ok(Disposition::Ack)
            }
        }
    }
}
