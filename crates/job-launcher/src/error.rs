//! Launcher error types.

use job_core::{PreflightError, StoreError};
use thiserror::Error;

/// Result type for launch operations.
pub type LaunchResult<T> = Result<T, LaunchError>;

#[derive(Debug, Error)]
pub enum LaunchError {
    /// A secret marked for launch-time entry was not supplied.
    #[error("Missing required input: {0}")]
    NeedsInput(String),

    #[error("Invalid launch parameters: {0}")]
    Invalid(String),

    #[error("Failed to prepare scratch space: {0}")]
    Scratch(std::io::Error),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

impl LaunchError {
    /// Errors caused by the task's own parameters rather than the host.
    pub fn is_task_error(&self) -> bool {
        matches!(self, LaunchError::NeedsInput(_) | LaunchError::Invalid(_))
    }
}

impl From<LaunchError> for PreflightError {
    fn from(err: LaunchError) -> Self {
        match err {
            LaunchError::NeedsInput(field) => PreflightError::NeedsInput(field),
            other => PreflightError::Invalid(other.to_string()),
        }
    }
}
