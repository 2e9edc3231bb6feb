//! Typed commands, the validation exchange, and outcome payloads.
//!
//! These are the messages the services exchange over the bus. Commands are
//! enums, one per owning service, so a consumer subscribed to a command
//! topic decodes a single type and dispatches on the variant. The
//! validation request/reply pair is the one cross-service exchange with
//! request/response semantics; it correlates on the creation attempt's
//! idempotency key.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::idempotency::IdempotencyKey;
use crate::message::{Message, MessageError};
use crate::practitioner::{CreatePractitioner, PractitionerId, UpdatePractitioner};
use crate::prescription::{
    CreatePrescription, Prescription, PrescriptionId, PrescriptionState, UpdatePrescription,
};

/// Commands addressed to the prescription service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PrescriptionCommand {
    /// Create a prescription (the idempotent path).
    Create(CreatePrescription),
    /// List all prescriptions.
    FindAll,
    /// Fetch one prescription.
    FindOne {
        /// The prescription to fetch.
        id: PrescriptionId,
    },
    /// Update a prescription's business fields.
    Update {
        /// The prescription to update.
        id: PrescriptionId,
        /// The fields to change.
        update: UpdatePrescription,
    },
    /// Delete a prescription.
    Delete {
        /// The prescription to delete.
        id: PrescriptionId,
    },
}

impl Message for PrescriptionCommand {
    fn message_type(&self) -> &'static str {
        match self {
            Self::Create(_) => "prescription.create.v1",
            Self::FindAll => "prescription.find-all.v1",
            Self::FindOne { .. } => "prescription.find-one.v1",
            Self::Update { .. } => "prescription.update.v1",
            Self::Delete { .. } => "prescription.delete.v1",
        }
    }
}

/// Commands addressed to the practitioner service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PractitionerCommand {
    /// Register a practitioner.
    Create(CreatePractitioner),
    /// List all practitioners.
    FindAll,
    /// Fetch one practitioner.
    FindOne {
        /// The practitioner to fetch.
        id: PractitionerId,
    },
    /// Update a practitioner.
    Update {
        /// The practitioner to update.
        id: PractitionerId,
        /// The fields to change.
        update: UpdatePractitioner,
    },
    /// Delete a practitioner.
    Delete {
        /// The practitioner to delete.
        id: PractitionerId,
    },
}

impl Message for PractitionerCommand {
    fn message_type(&self) -> &'static str {
        match self {
            Self::Create(_) => "practitioner.create.v1",
            Self::FindAll => "practitioner.find-all.v1",
            Self::FindOne { .. } => "practitioner.find-one.v1",
            Self::Update { .. } => "practitioner.update.v1",
            Self::Delete { .. } => "practitioner.delete.v1",
        }
    }
}

/// Request half of the practitioner validation exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    /// The creation attempt's idempotency key; doubles as the correlation
    /// identifier and as the replier's own duplicate-check key.
    pub idempotency_key: IdempotencyKey,
    /// The practitioner to validate.
    pub practitioner_id: PractitionerId,
    /// The prescription being created.
    pub prescription_id: PrescriptionId,
    /// Snapshot of the creation payload, for the validator's audit trail.
    pub snapshot: CreatePrescription,
}

impl Message for ValidationRequest {
    fn message_type(&self) -> &'static str {
        "validation.request.v1"
    }
}

/// Verdict carried by a [`ValidationReply`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    /// The practitioner is valid.
    Validated,
    /// The practitioner is not valid.
    Rejected,
}

/// Reply half of the practitioner validation exchange.
///
/// Correlates to exactly one outstanding request via `idempotency_key`.
/// The replier is idempotent: receiving the same request twice produces
/// the identical reply both times.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationReply {
    /// Correlation identifier, echoed from the request.
    pub idempotency_key: IdempotencyKey,
    /// The practitioner that was checked.
    pub practitioner_id: PractitionerId,
    /// The prescription the check was for.
    pub prescription_id: PrescriptionId,
    /// The verdict.
    pub status: ValidationStatus,
    /// Human-readable explanation of the verdict.
    pub message: String,
}

impl Message for ValidationReply {
    fn message_type(&self) -> &'static str {
        "validation.reply.v1"
    }
}

/// Generic reply payload for CRUD operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the operation succeeded.
    pub success: bool,
    /// The resulting record(s), when there are any.
    pub data: Option<T>,
    /// Machine-oriented error description on failure.
    pub error: Option<String>,
    /// Human-readable note.
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// A successful response carrying data.
    #[must_use]
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    /// A successful response carrying data and a note.
    #[must_use]
    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: Some(message.into()),
        }
    }

    /// A successful response with no data (e.g. delete).
    #[must_use]
    pub fn ok_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            message: Some(message.into()),
        }
    }

    /// A failed response.
    #[must_use]
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }
}

impl<T> Message for ApiResponse<T>
where
    T: Send + Sync + 'static,
{
    fn message_type(&self) -> &'static str {
        "api.response.v1"
    }
}

/// Terminal outcome of one prescription creation attempt.
///
/// This is what gets stored in the idempotency store (as JSON) and what is
/// replied to the creation caller, on the first processing and,
/// byte-identically, on every redelivery after it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateOutcome {
    /// `true` only when the prescription ended up `Validated`.
    pub success: bool,
    /// The stored prescription snapshot, when one exists.
    pub prescription: Option<Prescription>,
    /// Human-readable summary of the outcome.
    pub message: String,
    /// The validator's explanation, or the timeout reason, which is
    /// always distinguishable from an explicit rejection.
    pub validation: Option<String>,
}

impl CreateOutcome {
    /// Outcome for a prescription that passed validation.
    #[must_use]
    pub fn validated(prescription: Prescription, validation: impl Into<String>) -> Self {
        Self {
            success: true,
            prescription: Some(prescription),
            message: "prescription created and validated".to_string(),
            validation: Some(validation.into()),
        }
    }

    /// Outcome for a prescription the validator declined or that timed out.
    ///
    /// A rejection is a valid business outcome, not a processing error: it
    /// is durably recorded and the inbound message is acknowledged.
    #[must_use]
    pub fn rejected(prescription: Prescription, validation: impl Into<String>) -> Self {
        Self {
            success: false,
            prescription: Some(prescription),
            message: "prescription created but rejected in validation".to_string(),
            validation: Some(validation.into()),
        }
    }

    /// Outcome for a creation request whose business id already exists.
    ///
    /// Distinct from duplicate delivery: the idempotency store did not know
    /// this attempt, so a *different* creation attempt owns the id.
    #[must_use]
    pub fn conflict(id: &PrescriptionId) -> Self {
        Self {
            success: false,
            prescription: None,
            message: format!("a prescription with id {id} already exists"),
            validation: None,
        }
    }

    /// The stored prescription's state, if any.
    #[must_use]
    pub fn state(&self) -> Option<PrescriptionState> {
        self.prescription.as_ref().map(|p| p.state)
    }

    /// Encode for the idempotency store.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<serde_json::Value, MessageError> {
        serde_json::to_value(self).map_err(|e| MessageError::Serialization(e.to_string()))
    }

    /// Decode from the idempotency store.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Deserialization`] if the stored value does
    /// not decode.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, MessageError> {
        serde_json::from_value(value.clone())
            .map_err(|e| MessageError::Deserialization(e.to_string()))
    }
}

impl Message for CreateOutcome {
    fn message_type(&self) -> &'static str {
        "prescription.outcome.v1"
    }
}

/// Reason a validation round-trip produced a rejection.
///
/// Exists so the stored outcome's message field always distinguishes "the
/// validator said no" from "we never heard back".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectionReason {
    /// The validator replied with an explicit rejection.
    Declined(String),
    /// No correlated reply arrived before the timeout.
    TimedOut(Duration),
}

impl RejectionReason {
    /// The message recorded in the outcome payload.
    #[must_use]
    pub fn into_message(self) -> String {
        match self {
            Self::Declined(message) => message,
            Self::TimedOut(timeout) => format!(
                "validation timed out after {}s: no reply received from the practitioner service",
                timeout.as_secs()
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code
mod tests {
    use super::*;
    use crate::prescription::PatientId;
    use chrono::{DateTime, Utc};

    fn sample_prescription(state: PrescriptionState) -> Prescription {
        let mut p = Prescription::from_create(
            CreatePrescription {
                id: PrescriptionId::new("RX1"),
                practitioner_id: PractitionerId::new("DOC1"),
                patient_id: PatientId::new("PAT1"),
                issued_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0)
                    .expect("valid timestamp"),
                diagnosis: "bronchitis".to_string(),
                notes: None,
                location: None,
            },
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("valid timestamp"),
        );
        if state != PrescriptionState::Pending {
            p.transition(state, p.created_at).expect("legal transition");
        }
        p
    }

    #[test]
    fn outcome_round_trips_through_json() {
        let outcome = CreateOutcome::validated(
            sample_prescription(PrescriptionState::Validated),
            "practitioner DOC1 validated",
        );
        let json = outcome.to_json().expect("encodes");
        let decoded = CreateOutcome::from_json(&json).expect("decodes");
        assert_eq!(decoded, outcome);
    }

    #[test]
    fn timeout_reason_differs_from_an_explicit_rejection() {
        let declined = RejectionReason::Declined("license expired".to_string()).into_message();
        let timed_out = RejectionReason::TimedOut(Duration::from_secs(10)).into_message();
        assert_ne!(declined, timed_out);
        assert!(timed_out.contains("timed out"));
    }

    #[test]
    fn command_message_types_are_per_variant() {
        let cmd = PrescriptionCommand::FindOne {
            id: PrescriptionId::new("RX1"),
        };
        assert_eq!(cmd.message_type(), "prescription.find-one.v1");
        let cmd = PractitionerCommand::FindAll;
        assert_eq!(cmd.message_type(), "practitioner.find-all.v1");
    }
}
