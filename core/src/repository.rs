//! Repository traits for record persistence.
//!
//! The coordination layer treats storage as a black box behind these
//! traits; the production implementations live in `rxflow-postgres` and
//! the in-memory fakes in `rxflow-testing`.

use async_trait::async_trait;
use thiserror::Error;

use crate::practitioner::{Practitioner, PractitionerId};
use crate::prescription::{Prescription, PrescriptionId};

/// Errors from record persistence.
#[derive(Error, Debug, Clone)]
pub enum RepositoryError {
    /// A uniqueness constraint was violated on insert.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backing store could not be reached or errored.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Persistence seam for prescription records.
#[async_trait]
pub trait PrescriptionRepository: Send + Sync {
    /// Insert a new prescription.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Conflict`] if a record with the same id
    /// already exists.
    async fn insert(&self, prescription: &Prescription) -> Result<(), RepositoryError>;

    /// Fetch a prescription by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] on storage failure; absence
    /// is `Ok(None)`, not an error.
    async fn find(&self, id: &PrescriptionId) -> Result<Option<Prescription>, RepositoryError>;

    /// List all prescriptions, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] on storage failure.
    async fn find_all(&self) -> Result<Vec<Prescription>, RepositoryError>;

    /// Persist the current state of an existing prescription.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the record does not exist.
    async fn update(&self, prescription: &Prescription) -> Result<(), RepositoryError>;

    /// Delete a prescription by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the record does not exist.
    async fn delete(&self, id: &PrescriptionId) -> Result<(), RepositoryError>;
}

/// Persistence seam for practitioner records.
#[async_trait]
pub trait PractitionerRepository: Send + Sync {
    /// Insert a new practitioner.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Conflict`] if a record with the same id
    /// or license number already exists.
    async fn insert(&self, practitioner: &Practitioner) -> Result<(), RepositoryError>;

    /// Fetch a practitioner by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] on storage failure; absence
    /// is `Ok(None)`, not an error.
    async fn find(&self, id: &PractitionerId) -> Result<Option<Practitioner>, RepositoryError>;

    /// List all practitioners.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] on storage failure.
    async fn find_all(&self) -> Result<Vec<Practitioner>, RepositoryError>;

    /// Persist the current state of an existing practitioner.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the record does not exist.
    async fn update(&self, practitioner: &Practitioner) -> Result<(), RepositoryError>;

    /// Delete a practitioner by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the record does not exist.
    async fn delete(&self, id: &PractitionerId) -> Result<(), RepositoryError>;
}
