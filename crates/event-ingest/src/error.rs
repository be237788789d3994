//! Pipeline error types.

use job_core::StoreError;
use thiserror::Error;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Event store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid event message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Intake error: {0}")]
    Intake(String),

    /// A worker queue closed while the front end still needed it.
    #[error("Worker {0} is gone")]
    WorkerGone(usize),
}

impl From<async_nats::SubscribeError> for IngestError {
    fn from(err: async_nats::SubscribeError) -> Self {
        IngestError::Intake(err.to_string())
    }
}
