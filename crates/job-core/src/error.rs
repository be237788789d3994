//! Error types for job record storage.

use thiserror::Error;

use crate::model::{TaskId, TaskStatus};

/// Errors returned by a [`JobStore`](crate::store::JobStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this id.
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// Concurrent write conflict (serialization failure, deadlock).
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The requested status change would move the task backwards.
    #[error("Invalid status transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// A compare-and-set update found a different status than expected.
    #[error("Unexpected status for task {id}: expected {expected}, found {found}")]
    StatusMismatch {
        id: TaskId,
        expected: TaskStatus,
        found: TaskStatus,
    },

    /// A stored record could not be decoded.
    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: TaskId, reason: String },

    /// Any other database error.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

/// PostgreSQL SQLSTATE codes worth retrying.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                    StoreError::Conflict(db.message().to_string())
                }
                _ => StoreError::Database(err),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Conflict("deadlock".into()).is_transient());
        assert!(StoreError::Unavailable("pool closed".into()).is_transient());
        assert!(!StoreError::NotFound(7).is_transient());
    }

    #[test]
    fn test_pool_timeout_is_unavailable() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn test_transition_display() {
        let err = StoreError::InvalidTransition {
            id: 3,
            from: TaskStatus::Running,
            to: TaskStatus::Waiting,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition for task 3: running -> waiting"
        );
    }
}
