//! Job store error types.

use thiserror::Error;

use obbd_models::{JobId, JobTransitionError};

pub type JobStoreResult<T> = Result<T, JobStoreError>;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Rejected update: {0}")]
    Transition(#[from] JobTransitionError),

    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}

impl JobStoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, JobStoreError::NotFound(_))
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobStoreError::Unavailable(_))
    }
}
