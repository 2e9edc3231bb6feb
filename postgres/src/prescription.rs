//! PostgreSQL-backed prescription repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rxflow_core::practitioner::PractitionerId;
use rxflow_core::prescription::{PatientId, Prescription, PrescriptionId, PrescriptionState};
use rxflow_core::repository::{PrescriptionRepository, RepositoryError};
use sqlx::{PgPool, Row};

use crate::map_sqlx_error;

/// PostgreSQL implementation of
/// [`PrescriptionRepository`](rxflow_core::repository::PrescriptionRepository).
pub struct PostgresPrescriptionRepository {
    pool: PgPool,
}

impl PostgresPrescriptionRepository {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the prescriptions table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS prescriptions (
                id              TEXT PRIMARY KEY,
                practitioner_id TEXT NOT NULL,
                patient_id      TEXT NOT NULL,
                issued_at       TIMESTAMPTZ NOT NULL,
                diagnosis       TEXT NOT NULL,
                notes           TEXT,
                location        TEXT,
                state           TEXT NOT NULL DEFAULT 'PENDING',
                created_at      TIMESTAMPTZ NOT NULL,
                updated_at      TIMESTAMPTZ NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure prescriptions schema", &e))?;
        Ok(())
    }

    fn row_to_prescription(row: &sqlx::postgres::PgRow) -> Result<Prescription, RepositoryError> {
        let state: String = row
            .try_get("state")
            .map_err(|e| map_sqlx_error("read prescription state", &e))?;
        let state = PrescriptionState::parse(&state)
            .map_err(|e| RepositoryError::Unavailable(format!("corrupt state column: {e}")))?;

        Ok(Prescription {
            id: PrescriptionId::new(
                row.try_get::<String, _>("id")
                    .map_err(|e| map_sqlx_error("read prescription id", &e))?,
            ),
            practitioner_id: PractitionerId::new(
                row.try_get::<String, _>("practitioner_id")
                    .map_err(|e| map_sqlx_error("read practitioner id", &e))?,
            ),
            patient_id: PatientId::new(
                row.try_get::<String, _>("patient_id")
                    .map_err(|e| map_sqlx_error("read patient id", &e))?,
            ),
            issued_at: row
                .try_get::<DateTime<Utc>, _>("issued_at")
                .map_err(|e| map_sqlx_error("read issued_at", &e))?,
            diagnosis: row
                .try_get("diagnosis")
                .map_err(|e| map_sqlx_error("read diagnosis", &e))?,
            notes: row
                .try_get("notes")
                .map_err(|e| map_sqlx_error("read notes", &e))?,
            location: row
                .try_get("location")
                .map_err(|e| map_sqlx_error("read location", &e))?,
            state,
            created_at: row
                .try_get::<DateTime<Utc>, _>("created_at")
                .map_err(|e| map_sqlx_error("read created_at", &e))?,
            updated_at: row
                .try_get::<DateTime<Utc>, _>("updated_at")
                .map_err(|e| map_sqlx_error("read updated_at", &e))?,
        })
    }
}

#[async_trait]
impl PrescriptionRepository for PostgresPrescriptionRepository {
    async fn insert(&self, prescription: &Prescription) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO prescriptions
                (id, practitioner_id, patient_id, issued_at, diagnosis,
                 notes, location, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(prescription.id.as_str())
        .bind(prescription.practitioner_id.as_str())
        .bind(prescription.patient_id.as_str())
        .bind(prescription.issued_at)
        .bind(&prescription.diagnosis)
        .bind(&prescription.notes)
        .bind(&prescription.location)
        .bind(prescription.state.as_str())
        .bind(prescription.created_at)
        .bind(prescription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert prescription", &e))?;
        Ok(())
    }

    async fn find(&self, id: &PrescriptionId) -> Result<Option<Prescription>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM prescriptions WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find prescription", &e))?;

        row.as_ref().map(Self::row_to_prescription).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Prescription>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM prescriptions ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list prescriptions", &e))?;

        rows.iter().map(Self::row_to_prescription).collect()
    }

    async fn update(&self, prescription: &Prescription) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE prescriptions
            SET practitioner_id = $2, patient_id = $3, issued_at = $4,
                diagnosis = $5, notes = $6, location = $7, state = $8,
                updated_at = $9
            WHERE id = $1
            ",
        )
        .bind(prescription.id.as_str())
        .bind(prescription.practitioner_id.as_str())
        .bind(prescription.patient_id.as_str())
        .bind(prescription.issued_at)
        .bind(&prescription.diagnosis)
        .bind(&prescription.notes)
        .bind(&prescription.location)
        .bind(prescription.state.as_str())
        .bind(prescription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update prescription", &e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "prescription {} not found",
                prescription.id
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: &PrescriptionId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM prescriptions WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete prescription", &e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "prescription {id} not found"
            )));
        }
        Ok(())
    }
}
