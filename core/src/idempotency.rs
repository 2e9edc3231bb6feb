//! Idempotency store and distributed lock traits.
//!
//! Together these two primitives turn at-least-once delivery into
//! effective-once processing:
//!
//! ```text
//! inbound message
//!       │
//!       ▼
//! ┌──────────────────┐  hit   return cached outcome, ack
//! │ store.get(key)   ├──────────────────────────────────►
//! └────────┬─────────┘
//!          │ miss
//!          ▼
//! ┌──────────────────┐  denied   requeue (another worker owns it)
//! │ lock.acquire     ├──────────────────────────────────►
//! └────────┬─────────┘
//!          │ granted
//!          ▼
//!    re-check store, do the work, store.put, lock.release, ack
//! ```
//!
//! The store check alone is not sufficient (check-then-act is racy across
//! workers), which is why the lock is mandatory and not an optimization.
//! The store check before the lock is the fast path for the dominant
//! redelivery case; the re-check after acquisition closes the race where
//! two workers both miss and the loser proceeds after the winner releases.
//!
//! Both primitives may share one physical store; keys are namespaced
//! (`idempotency:` vs `lock:`) to avoid collision.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::prescription::PrescriptionId;

/// Deterministic identifier for one logical operation.
///
/// Derived from the operation's business identifier, never generated per
/// delivery, so every redelivered copy of the same message maps to the
/// same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Key for a prescription creation attempt.
    #[must_use]
    pub fn for_create(id: &PrescriptionId) -> Self {
        Self(format!("create-prescription:{id}"))
    }

    /// Key the validation *replier* uses for its own duplicate check.
    ///
    /// Scoped under a distinct prefix so the replier's record never
    /// collides with the consumer's record for the same exchange.
    #[must_use]
    pub fn validation_scope(&self) -> Self {
        Self(format!("validate:{}", self.0))
    }

    /// Build a key from a raw string (e.g. when read back off the wire).
    #[must_use]
    pub fn from_string(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from the idempotency store or lock.
///
/// Unavailability is deliberately distinct from absence: "not found" means
/// the operation has not completed, while `Unavailable` means we cannot
/// know, and the consumer must requeue rather than silently reprocess.
#[derive(Error, Debug, Clone)]
pub enum IdempotencyError {
    /// The backing store could not be reached or errored.
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),

    /// A stored outcome could not be encoded or decoded.
    #[error("outcome serialization failed: {0}")]
    Serialization(String),
}

/// Durable record of completed operations.
///
/// Entries are written once, after successful processing, and live until
/// the retention ttl expires. Overwriting an unexpired entry is a repair
/// operation, never part of the happy path: the lock serializes writers,
/// so a double write indicates a bug upstream.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Whether a terminal outcome is already recorded for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Unavailable`] if the store cannot be
    /// reached.
    async fn has(&self, key: &IdempotencyKey) -> Result<bool, IdempotencyError>;

    /// Fetch the stored outcome for `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Unavailable`] if the store cannot be
    /// reached.
    async fn get(&self, key: &IdempotencyKey)
    -> Result<Option<serde_json::Value>, IdempotencyError>;

    /// Record the terminal outcome for `key` with a retention ttl.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Unavailable`] if the store cannot be
    /// reached.
    async fn put(
        &self,
        key: &IdempotencyKey,
        outcome: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), IdempotencyError>;
}

/// Cross-process mutual exclusion keyed per logical operation.
///
/// The ttl bounds how long a crashed holder can stall the operation: it
/// must exceed the worst-case validation round-trip by a safety margin
/// (too short risks double-processing, too long stalls legitimate retries
/// after a crash). The bound is configuration, not a constant; see the
/// service config types.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Attempt to acquire the lock for `key`.
    ///
    /// Atomic set-if-not-exists; `false` means another worker currently
    /// owns the operation.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Unavailable`] if the store cannot be
    /// reached.
    async fn acquire(&self, key: &IdempotencyKey, ttl: Duration)
    -> Result<bool, IdempotencyError>;

    /// Release the lock for `key`.
    ///
    /// Best-effort: the lock may already have expired, which is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Unavailable`] if the store cannot be
    /// reached.
    async fn release(&self, key: &IdempotencyKey) -> Result<(), IdempotencyError>;
}
