//! Error types for the ticket store

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness rule rejected the write (e.g. a second rating)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The row changed between the caller's read and this write
    #[error("Stale write: {0}")]
    Stale(String),

    /// The write referenced a row that does not exist (e.g. an unknown file id)
    #[error("Missing reference: {0}")]
    MissingReference(String),

    /// A stored value could not be mapped back onto the domain model
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            // PostgreSQL unique and foreign key violations
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(db_err.message().to_string()),
                Some("23503") => StoreError::MissingReference(db_err.message().to_string()),
                _ => StoreError::Database(db_err.to_string()),
            },
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<crate::types::UnknownVariant> for StoreError {
    fn from(err: crate::types::UnknownVariant) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
