//! Common error types for the ensemble services

use thiserror::Error;

/// Common result type for ensemble operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the ensemble services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested event, student or session does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rejected before any write: bad beacon identifier, malformed status, etc.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage contention that outlasted the retry budget; the caller may retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// True for SQLite lock contention (`SQLITE_BUSY` / `SQLITE_LOCKED`)
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                // Primary result code lives in the low byte of the extended code
                let primary = db_err
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                matches!(primary, Some(5) | Some(6))
                    || db_err.message().contains("database is locked")
            }
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(Error::Transient("busy".to_string()).is_retryable());
        assert!(!Error::Validation("bad".to_string()).is_retryable());
        assert!(!Error::NotFound("event 1".to_string()).is_retryable());
        assert!(!Error::Internal("boom".to_string()).is_retryable());
    }

    #[test]
    fn test_non_database_errors_are_not_lock_contention() {
        assert!(!Error::Internal("database is locked".to_string()).is_lock_contention());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_lock_contention());
    }
}
