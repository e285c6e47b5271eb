//! Common error types for Cobra

use thiserror::Error;

/// Common result type for Cobra operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Cobra crates
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

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Embedding text could not be encoded or decoded
    #[error("Embedding codec error: {0}")]
    Codec(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this is SQLite lock contention (worth retrying after a backoff)
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let message = db_err.to_string();
                message.contains("database is locked")
                    || message.contains("database table is locked")
                    || message.contains("database is busy")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_contention_only_for_database_errors() {
        let err = Error::Internal("database is locked".to_string());
        assert!(!err.is_lock_contention());

        let err = Error::Database(sqlx::Error::Protocol("database is locked".to_string()));
        assert!(err.is_lock_contention());

        let err = Error::Database(sqlx::Error::RowNotFound);
        assert!(!err.is_lock_contention());
    }
}
