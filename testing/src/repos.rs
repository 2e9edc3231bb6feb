//! In-memory repositories.

use async_trait::async_trait;
use rxflow_core::practitioner::{Practitioner, PractitionerId};
use rxflow_core::prescription::{Prescription, PrescriptionId};
use rxflow_core::repository::{
    PractitionerRepository, PrescriptionRepository, RepositoryError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn poisoned() -> RepositoryError {
    RepositoryError::Unavailable("repository lock poisoned".to_string())
}

/// In-memory [`PrescriptionRepository`].
#[derive(Clone, Default)]
pub struct InMemoryPrescriptionRepository {
    rows: Arc<Mutex<HashMap<String, Prescription>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryPrescriptionRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the repository into (or out of) an unavailable state.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored rows.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (test-only code).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Whether the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guard(&self) -> Result<MutexGuard<'_, HashMap<String, Prescription>>, RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "in-memory repository marked unavailable".to_string(),
            ));
        }
        self.rows.lock().map_err(|_| poisoned())
    }
}

#[async_trait]
impl PrescriptionRepository for InMemoryPrescriptionRepository {
    async fn insert(&self, prescription: &Prescription) -> Result<(), RepositoryError> {
        let mut rows = self.guard()?;
        if rows.contains_key(prescription.id.as_str()) {
            return Err(RepositoryError::Conflict(format!(
                "prescription {} already exists",
                prescription.id
            )));
        }
        rows.insert(prescription.id.as_str().to_string(), prescription.clone());
        Ok(())
    }

    async fn find(&self, id: &PrescriptionId) -> Result<Option<Prescription>, RepositoryError> {
        let rows = self.guard()?;
        Ok(rows.get(id.as_str()).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Prescription>, RepositoryError> {
        let rows = self.guard()?;
        let mut all: Vec<Prescription> = rows.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn update(&self, prescription: &Prescription) -> Result<(), RepositoryError> {
        let mut rows = self.guard()?;
        if !rows.contains_key(prescription.id.as_str()) {
            return Err(RepositoryError::NotFound(format!(
                "prescription {} not found",
                prescription.id
            )));
        }
        rows.insert(prescription.id.as_str().to_string(), prescription.clone());
        Ok(())
    }

    async fn delete(&self, id: &PrescriptionId) -> Result<(), RepositoryError> {
        let mut rows = self.guard()?;
        rows.remove(id.as_str())
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("prescription {id} not found")))
    }
}

/// In-memory [`PractitionerRepository`].
#[derive(Clone, Default)]
pub struct InMemoryPractitionerRepository {
    rows: Arc<Mutex<HashMap<String, Practitioner>>>,
}

impl InMemoryPractitionerRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<MutexGuard<'_, HashMap<String, Practitioner>>, RepositoryError> {
        self.rows.lock().map_err(|_| poisoned())
    }
}

#[async_trait]
impl PractitionerRepository for InMemoryPractitionerRepository {
    async fn insert(&self, practitioner: &Practitioner) -> Result<(), RepositoryError> {
        let mut rows = self.guard()?;
        let duplicate = rows.contains_key(practitioner.id.as_str())
            || rows
                .values()
                .any(|p| p.license_number == practitioner.license_number);
        if duplicate {
            return Err(RepositoryError::Conflict(
                "practitioner id or license number already exists".to_string(),
            ));
        }
        rows.insert(practitioner.id.as_str().to_string(), practitioner.clone());
        Ok(())
    }

    async fn find(&self, id: &PractitionerId) -> Result<Option<Practitioner>, RepositoryError> {
        let rows = self.guard()?;
        Ok(rows.get(id.as_str()).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Practitioner>, RepositoryError> {
        let rows = self.guard()?;
        let mut all: Vec<Practitioner> = rows.values().cloned().collect();
        all.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(all)
    }

    async fn update(&self, practitioner: &Practitioner) -> Result<(), RepositoryError> {
        let mut rows = self.guard()?;
        if !rows.contains_key(practitioner.id.as_str()) {
            return Err(RepositoryError::NotFound(format!(
                "practitioner {} not found",
                practitioner.id
            )));
        }
        rows.insert(practitioner.id.as_str().to_string(), practitioner.clone());
        Ok(())
    }

    async fn delete(&self, id: &PractitionerId) -> Result<(), RepositoryError> {
        let mut rows = self.guard()?;
        rows.remove(id.as_str())
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("practitioner {id} not found")))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code
mod tests {
    use super::*;
    use chrono::Utc;
    use rxflow_core::practitioner::CreatePractitioner;
    use rxflow_core::prescription::{CreatePrescription, PatientId};

    fn prescription(id: &str) -> Prescription {
        Prescription::from_create(
            CreatePrescription {
                id: PrescriptionId::new(id),
                practitioner_id: PractitionerId::new("DOC1"),
                patient_id: PatientId::new("PAT1"),
                issued_at: Utc::now(),
                diagnosis: "flu".to_string(),
                notes: None,
                location: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn duplicate_prescription_insert_conflicts() {
        let repo = InMemoryPrescriptionRepository::new();
        repo.insert(&prescription("RX1")).await.expect("first insert");

        let err = repo
            .insert(&prescription("RX1"))
            .await
            .expect_err("duplicate id");
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_license_number_conflicts() {
        let repo = InMemoryPractitionerRepository::new();
        let now = Utc::now();
        repo.insert(&Practitioner::from_create(
            CreatePractitioner {
                id: PractitionerId::new("DOC1"),
                license_number: "LIC-1".to_string(),
                institution: "General Hospital".to_string(),
                office_location: None,
            },
            now,
        ))
        .await
        .expect("first insert");

        let err = repo
            .insert(&Practitioner::from_create(
                CreatePractitioner {
                    id: PractitionerId::new("DOC2"),
                    license_number: "LIC-1".to_string(),
                    institution: "City Clinic".to_string(),
                    office_location: None,
                },
                now,
            ))
            .await
            .expect_err("duplicate license");
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn deleting_a_missing_row_is_not_found() {
        let repo = InMemoryPrescriptionRepository::new();
        let err = repo
            .delete(&PrescriptionId::new("RX404"))
            .await
            .expect_err("missing row");
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
