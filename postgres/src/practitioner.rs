//! PostgreSQL-backed practitioner repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rxflow_core::practitioner::{Practitioner, PractitionerId};
use rxflow_core::repository::{PractitionerRepository, RepositoryError};
use sqlx::{PgPool, Row};

use crate::map_sqlx_error;

/// PostgreSQL implementation of
/// [`PractitionerRepository`](rxflow_core::repository::PractitionerRepository).
pub struct PostgresPractitionerRepository {
    pool: PgPool,
}

impl PostgresPractitionerRepository {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the practitioners table if it does not exist.
    ///
    /// The license number carries a unique index; inserts violating it map
    /// to [`RepositoryError::Conflict`].
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Unavailable`] if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS practitioners (
                id              TEXT PRIMARY KEY,
                license_number  TEXT NOT NULL UNIQUE,
                institution     TEXT NOT NULL,
                office_location TEXT,
                created_at      TIMESTAMPTZ NOT NULL,
                updated_at      TIMESTAMPTZ NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure practitioners schema", &e))?;
        Ok(())
    }

    fn row_to_practitioner(row: &sqlx::postgres::PgRow) -> Result<Practitioner, RepositoryError> {
        Ok(Practitioner {
            id: PractitionerId::new(
                row.try_get::<String, _>("id")
                    .map_err(|e| map_sqlx_error("read practitioner id", &e))?,
            ),
            license_number: row
                .try_get("license_number")
                .map_err(|e| map_sqlx_error("read license number", &e))?,
            institution: row
                .try_get("institution")
                .map_err(|e| map_sqlx_error("read institution", &e))?,
            office_location: row
                .try_get("office_location")
                .map_err(|e| map_sqlx_error("read office location", &e))?,
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
impl PractitionerRepository for PostgresPractitionerRepository {
    async fn insert(&self, practitioner: &Practitioner) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO practitioners
                (id, license_number, institution, office_location, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(practitioner.id.as_str())
        .bind(&practitioner.license_number)
        .bind(&practitioner.institution)
        .bind(&practitioner.office_location)
        .bind(practitioner.created_at)
        .bind(practitioner.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert practitioner", &e))?;
        Ok(())
    }

    async fn find(&self, id: &PractitionerId) -> Result<Option<Practitioner>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM practitioners WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find practitioner", &e))?;

        row.as_ref().map(Self::row_to_practitioner).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Practitioner>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM practitioners ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list practitioners", &e))?;

        rows.iter().map(Self::row_to_practitioner).collect()
    }

    async fn update(&self, practitioner: &Practitioner) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE practitioners
            SET license_number = $2, institution = $3, office_location = $4,
                updated_at = $5
            WHERE id = $1
            ",
        )
        .bind(practitioner.id.as_str())
        .bind(&practitioner.license_number)
        .bind(&practitioner.institution)
        .bind(&practitioner.office_location)
        .bind(practitioner.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update practitioner", &e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "practitioner {} not found",
                practitioner.id
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: &PractitionerId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM practitioners WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete practitioner", &e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "practitioner {id} not found"
            )));
        }
        Ok(())
    }
}
