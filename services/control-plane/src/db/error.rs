//! Database error types.

use thiserror::Error;

use crate::registry::RegistryError;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/control-plane.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A stored row could not be turned into a domain value.
    #[error("corrupt row in {table}: {message}")]
    CorruptRow {
        table: &'static str,
        message: String,
    },
}

impl From<DbError> for RegistryError {
    fn from(err: DbError) -> Self {
        RegistryError::Backend(err.to_string())
    }
}
