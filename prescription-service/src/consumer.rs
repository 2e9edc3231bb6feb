//! The idempotent creation flow.
//!
//! One call to [`CreatePrescriptionFlow::handle`] processes one delivered
//! creation message end to end. The ordering inside is load-bearing:
//!
//! 1. store check (fast path for the dominant redelivery case)
//! 2. lock acquire; denial is *not* an error, it is a retry signal
//! 3. store re-check under the lock (closes the check-then-act race: a
//!    loser that raced the fast path sees the winner's result here instead
//!    of re-running the validation round-trip)
//! 4. record creation / adoption / conflict detection
//! 5. validation round-trip; explicit rejection and timeout are both
//!    terminal business outcomes with distinguishable reasons
//! 6. outcome stored under the same key *before* the lock is released, so
//!    a blocked racer observes the completed result immediately
//! 7. lock released on every exit path
//!
//! The caller acks only after `Ok(outcome)` comes back, i.e. after the
//! outcome is durable. Any infrastructure failure surfaces as
//! [`ConsumeError::Infrastructure`] and leaves the message unacknowledged,
//! which is safe to rerun from scratch: step 1/3 short-circuits whatever
//! already completed.

use rxflow_core::environment::Clock;
use rxflow_core::idempotency::{DistributedLock, IdempotencyError, IdempotencyKey, IdempotencyStore};
use rxflow_core::prescription::{CreatePrescription, Prescription, PrescriptionState};
use rxflow_core::protocol::{CreateOutcome, RejectionReason, ValidationRequest, ValidationStatus};
use rxflow_core::repository::{PrescriptionRepository, RepositoryError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::validation::{ValidationRequestError, ValidationRequester};

/// Why a creation attempt could not produce a terminal outcome.
///
/// Everything that *does* produce one (success, business rejection,
/// timeout-rejection, conflict) comes back as `Ok(CreateOutcome)`.
#[derive(Error, Debug)]
pub enum ConsumeError {
    /// Another worker holds the lock for this operation.
    ///
    /// Not an error to surface anywhere: the delivery is requeued without
    /// acknowledgment and a later redelivery re-runs the full check.
    #[error("creation attempt is locked by another worker")]
    Contended,

    /// Store, lock, repository, or transport failure.
    ///
    /// Never recorded as an outcome; the delivery is requeued so the whole
    /// attempt reruns.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl From<IdempotencyError> for ConsumeError {
    fn from(e: IdempotencyError) -> Self {
        Self::Infrastructure(e.to_string())
    }
}

/// Orchestrates one idempotent creation attempt.
pub struct CreatePrescriptionFlow {
    store: Arc<dyn IdempotencyStore>,
    lock: Arc<dyn DistributedLock>,
    repository: Arc<dyn PrescriptionRepository>,
    requester: Arc<ValidationRequester>,
    clock: Arc<dyn Clock>,
    lock_ttl: Duration,
    outcome_retention: Duration,
}

impl CreatePrescriptionFlow {
    /// Wire up the flow from its injected dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        lock: Arc<dyn DistributedLock>,
        repository: Arc<dyn PrescriptionRepository>,
        requester: Arc<ValidationRequester>,
        clock: Arc<dyn Clock>,
        lock_ttl: Duration,
        outcome_retention: Duration,
    ) -> Self {
        Self {
            store,
            lock,
            repository,
            requester,
            clock,
            lock_ttl,
            outcome_retention,
        }
    }

    /// Process one creation message.
    ///
    /// Returns the terminal outcome to reply with (fresh or cached; the
    /// cached payload is byte-identical to the first one).
    ///
    /// # Errors
    ///
    /// - [`ConsumeError::Contended`] when another worker owns the attempt
    /// - [`ConsumeError::Infrastructure`] when a dependency failed and the
    ///   delivery must requeue
    pub async fn handle(&self, create: CreatePrescription) -> Result<CreateOutcome, ConsumeError> {
        let key = IdempotencyKey::for_create(&create.id);

        // Fast path: redelivered messages short-circuit here without
        // touching the lock or the repository.
        if let Some(cached) = self.store.get(&key).await? {
            metrics::counter!("rxflow_create_duplicates_short_circuited").increment(1);
            info!(key = %key, "duplicate delivery, returning stored outcome");
            return CreateOutcome::from_json(&cached)
                .map_err(|e| ConsumeError::Infrastructure(e.to_string()));
        }

        if !self.lock.acquire(&key, self.lock_ttl).await? {
            metrics::counter!("rxflow_create_lock_contended").increment(1);
            info!(key = %key, "lock held by another worker, requeueing");
            return Err(ConsumeError::Contended);
        }

        let result = self.process_locked(&key, create).await;

        // Unconditional release: every path out of the critical section
        // passes through here. If the release itself fails the ttl reaps
        // the lock; nothing to do but note it.
        if let Err(e) = self.lock.release(&key).await {
            warn!(key = %key, error = %e, "lock release failed, ttl will expire it");
        }

        result
    }

    /// Critical section: runs with the lock held.
    async fn process_locked(
        &self,
        key: &IdempotencyKey,
        create: CreatePrescription,
    ) -> Result<CreateOutcome, ConsumeError> {
        // Re-check under the lock. Two workers can both miss the fast-path
        // check; the loser lands here after the winner released and must
        // not repeat the round-trip.
        if let Some(cached) = self.store.get(key).await? {
            info!(key = %key, "outcome appeared while waiting for the lock");
            return CreateOutcome::from_json(&cached)
                .map_err(|e| ConsumeError::Infrastructure(e.to_string()));
        }

        let prescription = match self.prepare_record(&create).await? {
            Prepared::Ready(prescription) => prescription,
            Prepared::Conflict(outcome) => return Ok(outcome),
        };

        let request = ValidationRequest {
            idempotency_key: key.clone(),
            practitioner_id: prescription.practitioner_id.clone(),
            prescription_id: prescription.id.clone(),
            snapshot: create,
        };

        let outcome = self.settle_validation(prescription, &request).await?;

        // Durably record the outcome before the lock is released and before
        // the caller acks; a crash right here leaves the message
        // unacknowledged and the rerun will repeat the (idempotent)
        // validation, never the ack.
        let payload = outcome
            .to_json()
            .map_err(|e| ConsumeError::Infrastructure(e.to_string()))?;
        self.store.put(key, &payload, self.outcome_retention).await?;

        metrics::counter!("rxflow_create_processed").increment(1);
        Ok(outcome)
    }

    /// Create the `PENDING` row, adopt an interrupted one, or report a
    /// conflict.
    async fn prepare_record(&self, create: &CreatePrescription) -> Result<Prepared, ConsumeError> {
        match self.repository.find(&create.id).await.map_err(infra)? {
            // A prior attempt crashed between the insert and its terminal
            // transition; this rerun picks the row back up.
            Some(existing) if existing.state == PrescriptionState::Pending => {
                info!(id = %existing.id, "resuming interrupted creation attempt");
                Ok(Prepared::Ready(existing))
            }
            // A *different* creation attempt owns this id: distinct,
            // non-idempotent conflict: no validation call, immediate
            // rejection to the caller.
            Some(existing) => {
                warn!(id = %existing.id, state = %existing.state, "business id already taken");
                Ok(Prepared::Conflict(CreateOutcome::conflict(&existing.id)))
            }
            None => {
                let prescription =
                    Prescription::from_create(create.clone(), self.clock.now());
                match self.repository.insert(&prescription).await {
                    Ok(()) => {
                        info!(id = %prescription.id, "prescription created in PENDING");
                        Ok(Prepared::Ready(prescription))
                    }
                    // Insert raced a distinct creator on another key.
                    Err(RepositoryError::Conflict(_)) => {
                        Ok(Prepared::Conflict(CreateOutcome::conflict(&prescription.id)))
                    }
                    Err(e) => Err(infra(e)),
                }
            }
        }
    }

    /// Run the round-trip and apply the terminal transition.
    async fn settle_validation(
        &self,
        mut prescription: Prescription,
        request: &ValidationRequest,
    ) -> Result<CreateOutcome, ConsumeError> {
        let verdict = match self.requester.request_validation(request).await {
            Ok(reply) if reply.status == ValidationStatus::Validated => {
                Verdict::Validated(reply.message)
            }
            Ok(reply) => Verdict::Rejected(RejectionReason::Declined(reply.message)),
            Err(ValidationRequestError::Timeout(t)) => {
                Verdict::Rejected(RejectionReason::TimedOut(t))
            }
            // Could not carry out the round-trip at all: requeue, leaving
            // the PENDING row for the rerun to adopt.
            Err(ValidationRequestError::Transport(e)) => {
                return Err(ConsumeError::Infrastructure(e));
            }
        };

        let now = self.clock.now();
        match verdict {
            Verdict::Validated(message) => {
                prescription
                    .transition(PrescriptionState::Validated, now)
                    .map_err(|e| ConsumeError::Infrastructure(e.to_string()))?;
                self.repository
                    .update(&prescription)
                    .await
                    .map_err(infra)?;
                info!(id = %prescription.id, "prescription VALIDATED");
                Ok(CreateOutcome::validated(prescription, message))
            }
            Verdict::Rejected(reason) => {
                prescription
                    .transition(PrescriptionState::Rejected, now)
                    .map_err(|e| ConsumeError::Infrastructure(e.to_string()))?;
                self.repository
                    .update(&prescription)
                    .await
                    .map_err(infra)?;
                let reason = reason.into_message();
                warn!(id = %prescription.id, reason = %reason, "prescription REJECTED");
                Ok(CreateOutcome::rejected(prescription, reason))
            }
        }
    }
}

enum Prepared {
    Ready(Prescription),
    Conflict(CreateOutcome),
}

enum Verdict {
    Validated(String),
    Rejected(RejectionReason),
}

fn infra(e: RepositoryError) -> ConsumeError {
    ConsumeError::Infrastructure(e.to_string())
}
