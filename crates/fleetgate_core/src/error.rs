//! Error types for the fleetgate store.

use thiserror::Error;

/// Result type for store operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A direct lookup found nothing.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up (`device`, `proposal`, `rule`).
        kind: &'static str,
        /// The id that was not found.
        id: String,
    },

    /// A stored value could not be interpreted.
    #[error("invalid stored data: {message}")]
    InvalidData {
        /// Description of the problem.
        message: String,
    },

    /// Input rejected before reaching the store.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Creates an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Creates an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Returns true for a failed direct lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }

    /// Returns true when SQLite gave up waiting for a lock.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            CoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        )
    }
}
