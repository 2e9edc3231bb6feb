//! Prescription domain types and the lifecycle state machine.
//!
//! A prescription is created in [`PrescriptionState::Pending`] before the
//! practitioner validation round-trip, then moved to
//! [`PrescriptionState::Validated`] or [`PrescriptionState::Rejected`]
//! exactly once per creation attempt. Both are terminal for the
//! coordination layer; `Issued` is reachable only from `Validated` by a
//! separate issuing workflow.
//!
//! The state machine is enforced here, not in storage: every mutation goes
//! through [`Prescription::transition`] or [`Prescription::apply_update`],
//! which return [`LifecycleError::InvalidStateTransition`] instead of
//! silently ignoring an illegal move.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unique identifier for a prescription.
///
/// Prescription ids are natural business identifiers supplied by the
/// caller (e.g. `"RX-2024-0001"`), not generated: the idempotency key for
/// a creation attempt is derived from this value, so redelivered copies of
/// the same request map to the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrescriptionId(String);

impl PrescriptionId {
    /// Create a `PrescriptionId` from a business identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrescriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a patient.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatientId(String);

impl PatientId {
    /// Create a `PatientId` from a business identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a prescription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrescriptionState {
    /// Created, awaiting practitioner validation.
    Pending,
    /// Practitioner validation succeeded.
    Validated,
    /// Practitioner validation failed or timed out.
    Rejected,
    /// Dispensed by the issuing workflow (outside the coordination layer).
    Issued,
}

impl PrescriptionState {
    /// Whether this state is terminal for the coordination layer.
    ///
    /// `Validated` is terminal *here* even though the issuing workflow may
    /// later move it to `Issued`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Validated | Self::Rejected)
    }

    /// Database/string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Validated => "VALIDATED",
            Self::Rejected => "REJECTED",
            Self::Issued => "ISSUED",
        }
    }

    /// Parse a state from its string representation.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::UnknownState`] if the string doesn't match
    /// a known state.
    pub fn parse(s: &str) -> Result<Self, LifecycleError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "VALIDATED" => Ok(Self::Validated),
            "REJECTED" => Ok(Self::Rejected),
            "ISSUED" => Ok(Self::Issued),
            other => Err(LifecycleError::UnknownState(other.to_string())),
        }
    }

    /// Whether the `self → to` transition is legal.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Validated | Self::Rejected) | (Self::Validated, Self::Issued)
        )
    }
}

impl fmt::Display for PrescriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by the lifecycle engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// An illegal state transition was attempted.
    ///
    /// Re-invoking a transition on an already-terminal prescription is a
    /// programming error, not a protocol condition; callers get a typed
    /// failure rather than a silent no-op.
    #[error("invalid state transition for prescription {id}: {from} -> {to}")]
    InvalidStateTransition {
        /// The prescription being transitioned.
        id: PrescriptionId,
        /// Current state.
        from: PrescriptionState,
        /// Requested state.
        to: PrescriptionState,
    },

    /// Business fields of a rejected prescription are immutable.
    #[error("prescription {id} is rejected and its fields cannot be modified")]
    RejectedImmutable {
        /// The rejected prescription.
        id: PrescriptionId,
    },

    /// A state string from storage didn't match any known state.
    #[error("unknown prescription state: {0}")]
    UnknownState(String),
}

/// Payload for creating a new prescription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreatePrescription {
    /// Business identifier for the new prescription.
    pub id: PrescriptionId,
    /// The prescribing practitioner to validate against.
    pub practitioner_id: crate::practitioner::PractitionerId,
    /// The patient the prescription is issued to.
    pub patient_id: PatientId,
    /// When the prescription was issued.
    pub issued_at: DateTime<Utc>,
    /// Diagnosis motivating the prescription.
    pub diagnosis: String,
    /// Free-form clinical notes.
    pub notes: Option<String>,
    /// Where the prescription was issued.
    pub location: Option<String>,
}

/// Partial update of a prescription's business fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePrescription {
    /// Replacement diagnosis, if provided.
    pub diagnosis: Option<String>,
    /// Replacement notes, if provided.
    pub notes: Option<String>,
    /// Replacement issuing location, if provided.
    pub location: Option<String>,
}

/// A prescription record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    /// Business identifier.
    pub id: PrescriptionId,
    /// The prescribing practitioner.
    pub practitioner_id: crate::practitioner::PractitionerId,
    /// The patient.
    pub patient_id: PatientId,
    /// When the prescription was issued.
    pub issued_at: DateTime<Utc>,
    /// Diagnosis motivating the prescription.
    pub diagnosis: String,
    /// Free-form clinical notes.
    pub notes: Option<String>,
    /// Where the prescription was issued.
    pub location: Option<String>,
    /// Current lifecycle state.
    pub state: PrescriptionState,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Prescription {
    /// Create a new prescription in `Pending` state from a creation payload.
    #[must_use]
    pub fn from_create(create: CreatePrescription, now: DateTime<Utc>) -> Self {
        Self {
            id: create.id,
            practitioner_id: create.practitioner_id,
            patient_id: create.patient_id,
            issued_at: create.issued_at,
            diagnosis: create.diagnosis,
            notes: create.notes,
            location: create.location,
            state: PrescriptionState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new lifecycle state.
    ///
    /// Only `Pending → Validated`, `Pending → Rejected` and
    /// `Validated → Issued` are legal; each is applied at most once per
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidStateTransition`] for any other
    /// pair, including re-invocation on an already-terminal prescription.
    pub fn transition(
        &mut self,
        to: PrescriptionState,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        if !self.state.can_transition_to(to) {
            return Err(LifecycleError::InvalidStateTransition {
                id: self.id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    /// Apply a partial update to business fields.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::RejectedImmutable`] if the prescription is
    /// rejected; only `state` itself may be corrected administratively,
    /// which is outside this engine.
    pub fn apply_update(
        &mut self,
        update: UpdatePrescription,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        if self.state == PrescriptionState::Rejected {
            return Err(LifecycleError::RejectedImmutable {
                id: self.id.clone(),
            });
        }
        if let Some(diagnosis) = update.diagnosis {
            self.diagnosis = diagnosis;
        }
        if let Some(notes) = update.notes {
            self.notes = Some(notes);
        }
        if let Some(location) = update.location {
            self.location = Some(location);
        }
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code
mod tests {
    use super::*;
    use crate::practitioner::PractitionerId;
    use proptest::prelude::*;

    fn sample_create() -> CreatePrescription {
        CreatePrescription {
            id: PrescriptionId::new("RX1"),
            practitioner_id: PractitionerId::new("DOC1"),
            patient_id: PatientId::new("PAT1"),
            issued_at: Utc::now(),
            diagnosis: "seasonal allergy".to_string(),
            notes: None,
            location: None,
        }
    }

    #[test]
    fn new_prescription_starts_pending() {
        let p = Prescription::from_create(sample_create(), Utc::now());
        assert_eq!(p.state, PrescriptionState::Pending);
        assert_eq!(p.created_at, p.updated_at);
    }

    #[test]
    fn pending_transitions_to_validated() {
        let mut p = Prescription::from_create(sample_create(), Utc::now());
        p.transition(PrescriptionState::Validated, Utc::now())
            .expect("pending -> validated is legal");
        assert_eq!(p.state, PrescriptionState::Validated);
    }

    #[test]
    fn pending_transitions_to_rejected() {
        let mut p = Prescription::from_create(sample_create(), Utc::now());
        p.transition(PrescriptionState::Rejected, Utc::now())
            .expect("pending -> rejected is legal");
        assert_eq!(p.state, PrescriptionState::Rejected);
    }

    #[test]
    fn validated_can_be_issued() {
        let mut p = Prescription::from_create(sample_create(), Utc::now());
        p.transition(PrescriptionState::Validated, Utc::now())
            .expect("pending -> validated is legal");
        p.transition(PrescriptionState::Issued, Utc::now())
            .expect("validated -> issued is legal");
        assert_eq!(p.state, PrescriptionState::Issued);
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut p = Prescription::from_create(sample_create(), Utc::now());
        p.transition(PrescriptionState::Rejected, Utc::now())
            .expect("pending -> rejected is legal");

        let err = p
            .transition(PrescriptionState::Validated, Utc::now())
            .expect_err("rejected is terminal");
        assert!(matches!(
            err,
            LifecycleError::InvalidStateTransition {
                from: PrescriptionState::Rejected,
                to: PrescriptionState::Validated,
                ..
            }
        ));
    }

    #[test]
    fn rejected_prescription_fields_are_immutable() {
        let mut p = Prescription::from_create(sample_create(), Utc::now());
        p.transition(PrescriptionState::Rejected, Utc::now())
            .expect("pending -> rejected is legal");

        let err = p
            .apply_update(
                UpdatePrescription {
                    diagnosis: Some("revised".to_string()),
                    ..UpdatePrescription::default()
                },
                Utc::now(),
            )
            .expect_err("rejected rows are immutable");
        assert!(matches!(err, LifecycleError::RejectedImmutable { .. }));
        assert_eq!(p.diagnosis, "seasonal allergy");
    }

    #[test]
    fn pending_prescription_accepts_updates() {
        let mut p = Prescription::from_create(sample_create(), Utc::now());
        p.apply_update(
            UpdatePrescription {
                notes: Some("take with food".to_string()),
                ..UpdatePrescription::default()
            },
            Utc::now(),
        )
        .expect("pending rows are mutable");
        assert_eq!(p.notes.as_deref(), Some("take with food"));
    }

    #[test]
    fn state_round_trips_through_strings() {
        for state in [
            PrescriptionState::Pending,
            PrescriptionState::Validated,
            PrescriptionState::Rejected,
            PrescriptionState::Issued,
        ] {
            assert_eq!(
                PrescriptionState::parse(state.as_str()).expect("known state"),
                state
            );
        }
        assert!(PrescriptionState::parse("DISPENSED").is_err());
    }

    fn arb_state() -> impl Strategy<Value = PrescriptionState> {
        prop_oneof![
            Just(PrescriptionState::Pending),
            Just(PrescriptionState::Validated),
            Just(PrescriptionState::Rejected),
            Just(PrescriptionState::Issued),
        ]
    }

    proptest! {
        /// No sequence of transitions ever leaves a terminal-for-the-core
        /// state except `Validated -> Issued`.
        #[test]
        fn terminal_states_are_monotonic(targets in proptest::collection::vec(arb_state(), 1..8)) {
            let mut p = Prescription::from_create(sample_create(), Utc::now());
            for to in targets {
                let before = p.state;
                let result = p.transition(to, Utc::now());
                if before == PrescriptionState::Rejected {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(p.state, PrescriptionState::Rejected);
                }
                if before == PrescriptionState::Validated && to != PrescriptionState::Issued {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(p.state, PrescriptionState::Validated);
                }
            }
        }
    }
}
