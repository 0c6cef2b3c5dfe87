//! Job store trait.

use std::any::Any;

use async_trait::async_trait;

use obbd_models::{ImageRef, Job, JobId, JobUpdate};

use crate::error::JobStoreResult;

/// Exclusive hold on one job record.
///
/// Obtained from [`JobStore::get_for_update`] and consumed by
/// [`JobStore::save`]. Dropping it without saving releases the record
/// unchanged.
pub struct JobLock {
    job: Job,
    _guard: Box<dyn Any + Send + Sync>,
}

impl JobLock {
    pub fn new(job: Job, guard: impl Any + Send + Sync) -> Self {
        Self {
            job,
            _guard: Box::new(guard),
        }
    }

    /// Record as it was when the lock was taken.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn id(&self) -> &JobId {
        &self.job.id
    }
}

impl std::fmt::Debug for JobLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLock").field("job", &self.job.id).finish()
    }
}

/// Persistent job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in `Queued` with zero progress.
    async fn create(
        &self,
        image_ref: ImageRef,
        model_id: &str,
        confidence_threshold: f64,
    ) -> JobStoreResult<Job>;

    /// Read a job without locking it.
    async fn get(&self, id: &JobId) -> JobStoreResult<Option<Job>>;

    /// Wait for exclusive access to a job record.
    async fn get_for_update(&self, id: &JobId) -> JobStoreResult<JobLock>;

    /// Apply `update` to the locked record and release the lock.
    ///
    /// A rejected update leaves the record unchanged.
    async fn save(&self, lock: JobLock, update: JobUpdate) -> JobStoreResult<Job>;

    /// All jobs, newest first.
    async fn list(&self) -> JobStoreResult<Vec<Job>>;
}
