//! Scheduler error types.

use job_core::StoreError;
use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Control channel error: {0}")]
    Control(String),
}

impl From<async_nats::SubscribeError> for SchedulerError {
    fn from(err: async_nats::SubscribeError) -> Self {
        SchedulerError::Control(err.to_string())
    }
}
