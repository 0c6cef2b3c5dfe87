//! In-memory job store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use obbd_models::{ImageRef, Job, JobId, JobUpdate};

use crate::error::{JobStoreError, JobStoreResult};
use crate::store::{JobLock, JobStore};

struct Record {
    lock: Arc<Mutex<()>>,
    job: Job,
}

/// Job store held in process memory.
///
/// Each record has its own mutex, so locking one job never blocks another
/// and plain reads never wait on a locked record.
#[derive(Default)]
pub struct InMemoryJobStore {
    records: RwLock<HashMap<JobId, Record>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(
        &self,
        image_ref: ImageRef,
        model_id: &str,
        confidence_threshold: f64,
    ) -> JobStoreResult<Job> {
        let job = Job::new(image_ref, model_id, confidence_threshold);
        self.records.write().await.insert(
            job.id.clone(),
            Record {
                lock: Arc::new(Mutex::new(())),
                job: job.clone(),
            },
        );
        info!(job_id = %job.id, model = %job.model_id, "Created job");
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> JobStoreResult<Option<Job>> {
        Ok(self.records.read().await.get(id).map(|r| r.job.clone()))
    }

    async fn get_for_update(&self, id: &JobId) -> JobStoreResult<JobLock> {
        let record_lock = {
            let records = self.records.read().await;
            let record = records
                .get(id)
                .ok_or_else(|| JobStoreError::NotFound(id.clone()))?;
            Arc::clone(&record.lock)
        };

        let guard = record_lock.lock_owned().await;
        debug!(job_id = %id, "Locked job");

        // Read after acquiring so the snapshot includes the previous holder's write.
        let job = self
            .records
            .read()
            .await
            .get(id)
            .map(|r| r.job.clone())
            .ok_or_else(|| JobStoreError::NotFound(id.clone()))?;

        Ok(JobLock::new(job, guard))
    }

    async fn save(&self, lock: JobLock, update: JobUpdate) -> JobStoreResult<Job> {
        let fields = update.field_mask();
        let mut records = self.records.write().await;
        let record = records
            .get_mut(lock.id())
            .ok_or_else(|| JobStoreError::NotFound(lock.id().clone()))?;

        let mut job = record.job.clone();
        job.apply(update)?;
        record.job = job.clone();
        drop(records);
        drop(lock);

        debug!(job_id = %job.id, status = %job.status, ?fields, "Saved job");
        Ok(job)
    }

    async fn list(&self) -> JobStoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .records
            .read()
            .await
            .values()
            .map(|r| r.job.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use obbd_models::{ArtifactRef, DetectionResult, JobOutcome, JobStatus, JobTransitionError};

    async fn store_with_job() -> (InMemoryJobStore, Job) {
        let store = InMemoryJobStore::new();
        let job = store
            .create(ImageRef::new("uploads/a.png"), "default", 0.25)
            .await
            .unwrap();
        (store, job)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (store, job) = store_with_job().await;
        assert_eq!(job.status, JobStatus::Queued);

        let fetched = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched, job);
        assert!(store.get(&JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locked_update() {
        let (store, job) = store_with_job().await;

        let lock = store.get_for_update(&job.id).await.unwrap();
        assert_eq!(lock.job().status, JobStatus::Queued);
        let saved = store.save(lock, JobUpdate::processing()).await.unwrap();
        assert_eq!(saved.status, JobStatus::Processing);
        assert_eq!(saved.progress, 10);

        let outcome = JobOutcome::success(job.id.clone(), DetectionResult::default());
        let lock = store.get_for_update(&job.id).await.unwrap();
        store
            .save(lock, JobUpdate::done(outcome, ArtifactRef::new("labels/a.txt")))
            .await
            .unwrap();

        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Done);
        assert_eq!(stored.progress, 100);
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_record() {
        let (store, job) = store_with_job().await;

        let lock = store.get_for_update(&job.id).await.unwrap();
        let err = store.save(lock, JobUpdate::failed("early")).await.unwrap_err();
        assert!(matches!(
            err,
            JobStoreError::Transition(JobTransitionError::IllegalTransition { .. })
        ));
        assert_eq!(store.get(&job.id).await.unwrap().unwrap(), job);

        // The lock was released with the failed save.
        let lock = store.get_for_update(&job.id).await.unwrap();
        drop(lock);
    }

    #[tokio::test]
    async fn test_missing_job() {
        let store = InMemoryJobStore::new();
        let err = store.get_for_update(&JobId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let (store, job) = store_with_job().await;
        let store = Arc::new(store);

        let lock = store.get_for_update(&job.id).await.unwrap();

        let contender = {
            let store = Arc::clone(&store);
            let id = job.id.clone();
            tokio::spawn(async move {
                let lock = store.get_for_update(&id).await.unwrap();
                lock.job().status
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        // Reads are not blocked by the held lock.
        assert!(store.get(&job.id).await.unwrap().is_some());

        store.save(lock, JobUpdate::processing()).await.unwrap();
        assert_eq!(contender.await.unwrap(), JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = InMemoryJobStore::new();
        let first = store.create(ImageRef::new("a"), "default", 0.1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.create(ImageRef::new("b"), "default", 0.1).await.unwrap();

        let ids: Vec<JobId> = store.list().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(store.len().await, 2);
    }
}
