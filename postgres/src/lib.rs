//! PostgreSQL repositories for rxflow records.
//!
//! Each service owns its database: the prescription service persists
//! prescriptions, the practitioner service persists practitioners, and
//! neither reaches into the other's tables; cross-service reads happen
//! over the bus. The repositories here are plain CRUD behind the core
//! repository traits; all coordination logic stays out of storage.
//!
//! Uniqueness is enforced by the schema (primary keys, the practitioner
//! license unique index) and surfaced as
//! [`RepositoryError::Conflict`](rxflow_core::repository::RepositoryError).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod practitioner;
mod prescription;

pub use practitioner::PostgresPractitionerRepository;
pub use prescription::PostgresPrescriptionRepository;

use rxflow_core::repository::RepositoryError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Connect a pool to the given database.
///
/// # Errors
///
/// Returns [`RepositoryError::Unavailable`] if the pool cannot be
/// established.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, RepositoryError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| RepositoryError::Unavailable(format!("failed to connect to postgres: {e}")))?;
    tracing::info!(max_connections, "connected to postgres");
    Ok(pool)
}

pub(crate) fn map_sqlx_error(context: &str, e: &sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = e {
        if db.is_unique_violation() {
            return RepositoryError::Conflict(format!("{context}: unique constraint violated"));
        }
    }
    RepositoryError::Unavailable(format!("{context}: {e}"))
}
