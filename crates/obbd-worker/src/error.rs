//! Worker error types.

use thiserror::Error;

use obbd_models::{JobId, JobStatus};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: JobId, status: JobStatus },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Inference error: {0}")]
    Inference(#[from] obbd_inference::InferenceError),

    #[error("Storage error: {0}")]
    Storage(#[from] obbd_storage::StorageError),

    #[error("Job store error: {0}")]
    JobStore(#[from] obbd_jobstore::JobStoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] obbd_queue::QueueError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if the task should be delivered again.
    ///
    /// Only faults of the job store or queue qualify: any other error has
    /// already been recorded on the job as `FAILED`.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::JobStore(e) => e.is_retryable(),
            WorkerError::Queue(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// A duplicate delivery for a job that already finished.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, WorkerError::AlreadyTerminal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obbd_jobstore::JobStoreError;

    #[test]
    fn test_retryable() {
        assert!(WorkerError::JobStore(JobStoreError::unavailable("down")).is_retryable());
        assert!(!WorkerError::JobNotFound(JobId::new()).is_retryable());
        assert!(!WorkerError::Inference(obbd_inference::InferenceError::model_unavailable("x")).is_retryable());

        let dup = WorkerError::AlreadyTerminal {
            id: JobId::new(),
            status: JobStatus::Done,
        };
        assert!(dup.is_duplicate());
        assert!(!dup.is_retryable());
    }
}
