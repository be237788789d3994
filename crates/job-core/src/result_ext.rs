//! Result extension trait for logging errors with context.

use std::fmt::Display;

use tracing::error;

/// Adds a `log` method to `Result` that logs an error with context and
/// the caller's source location, returning the result unchanged.
///
/// ```ignore
/// use job_core::ResultExt;
///
/// store.update(id, update).await.log("marking task failed")?;
/// ```
pub trait ResultExt<T, E> {
    fn log<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            error!(
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }
}
