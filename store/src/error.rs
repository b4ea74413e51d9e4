//! Store error types.

use fxquote_common::FxQuoteError;
use thiserror::Error;

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// Errors raised by the store and cache backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A referenced record does not exist.
    #[error("Foreign key violated: {0}")]
    ForeignKey(String),

    /// Any other database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Cache used before `connect` or after `close`.
    #[error("Cache is not connected")]
    CacheNotConnected,

    /// Cache backend failure.
    #[error("Cache error: {0}")]
    Cache(String),
}

impl StoreError {
    /// Check if this error came from a uniqueness constraint.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some(PG_UNIQUE_VIOLATION) => {
                    return StoreError::UniqueViolation(db_err.message().to_string())
                }
                Some(PG_FOREIGN_KEY_VIOLATION) => {
                    return StoreError::ForeignKey(db_err.message().to_string())
                }
                _ => {}
            }
        }
        StoreError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(err.to_string())
    }
}

impl From<StoreError> for FxQuoteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(message) => FxQuoteError::Conflict(message),
            StoreError::ForeignKey(message) => FxQuoteError::NotFound(message),
            other => FxQuoteError::Internal(other.to_string()),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
