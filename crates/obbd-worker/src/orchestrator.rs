//! Detection job orchestrator.
//!
//! Drives one job from pickup to a terminal state:
//!
//! 1. Lock the job and mark it `PROCESSING` at 10%
//! 2. Run the job's model over the image
//! 3. Normalize the raw prediction
//! 4. Write the label file
//! 5. Lock again and mark it `DONE` at 100% with the result and label ref
//!
//! Any error in steps 2-5 marks the job `FAILED` at 100% and is returned to
//! the caller. Duplicate deliveries find the job terminal and write nothing.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, Instrument};

use obbd_geometry::{normalize, RawPrediction};
use obbd_inference::{InferenceBackend, ModelRegistry};
use obbd_jobstore::{JobStore, JobStoreError};
use obbd_models::{ArtifactRef, DetectionResult, ImageRef, Job, JobId, JobOutcome, JobUpdate};
use obbd_queue::DetectTask;
use obbd_storage::{label_artifact, ArtifactStore};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// Runs detection jobs against the job store, model and artifact store.
pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    inference: Arc<dyn InferenceBackend>,
    models: Arc<ModelRegistry>,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        inference: Arc<dyn InferenceBackend>,
        models: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            jobs,
            artifacts,
            inference,
            models,
        }
    }

    /// Process one task to a terminal state.
    ///
    /// Returns the terminal job record, or the error that failed it.
    pub async fn process(&self, task: &DetectTask) -> WorkerResult<Job> {
        let logger = JobLogger::new(&task.job_id, "detect");
        let span = logger.create_span();
        self.process_logged(task, &logger).instrument(span).await
    }

    async fn process_logged(&self, task: &DetectTask, logger: &JobLogger) -> WorkerResult<Job> {
        let job = self.mark_processing(&task.job_id).await?;
        logger.log_transition(job.status, job.progress);
        logger.log_start(&format!("model={} image={}", job.model_id, task.image_ref));
        crate::metrics::record_job_started(&job.model_id);

        match self.run(&job, task, logger).await {
            Ok(done) => {
                let count = done.result.as_ref().map_or(0, |r| r.detections().len());
                logger.log_transition(done.status, done.progress);
                logger.log_completion(&format!("{} detections", count));
                crate::metrics::record_job_completed(&done.model_id, count);
                Ok(done)
            }
            Err(e) if e.is_duplicate() => {
                logger.log_warning(&e.to_string());
                Err(e)
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                crate::metrics::record_job_failed(&job.model_id);
                self.record_failure(&task.job_id, &e, logger).await;
                Err(e)
            }
        }
    }

    /// Step 1: take the lock and move to `PROCESSING`.
    async fn mark_processing(&self, id: &JobId) -> WorkerResult<Job> {
        let lock = self.jobs.get_for_update(id).await.map_err(|e| match e {
            JobStoreError::NotFound(id) => WorkerError::JobNotFound(id),
            other => other.into(),
        })?;

        let current = lock.job();
        if current.is_terminal() {
            return Err(WorkerError::AlreadyTerminal {
                id: current.id.clone(),
                status: current.status,
            });
        }

        Ok(self.jobs.save(lock, JobUpdate::processing()).await?)
    }

    /// Steps 2-5.
    async fn run(&self, job: &Job, task: &DetectTask, logger: &JobLogger) -> WorkerResult<Job> {
        let model = self.models.lookup(&job.model_id)?;
        self.inference.check_model(model)?;

        let started = Instant::now();
        let raw = self
            .inference
            .infer(&task.image_ref, model, task.confidence_threshold)
            .await?;
        crate::metrics::record_inference(&model.id, started.elapsed());

        let result = normalize_with_size(&raw, &task.image_ref).await;
        logger.log_progress(&format!(
            "{} detections on {}x{}",
            result.detection_count(),
            result.image_width,
            result.image_height
        ));

        let artifact = label_artifact(&job.id, &result.detections);
        let labels = self.artifacts.write(&artifact.path, artifact.bytes).await?;

        self.mark_done(&job.id, result, labels).await
    }

    /// Step 5.
    async fn mark_done(&self, id: &JobId, result: DetectionResult, labels: ArtifactRef) -> WorkerResult<Job> {
        let lock = self.jobs.get_for_update(id).await?;
        let current = lock.job();
        if current.is_terminal() {
            return Err(WorkerError::AlreadyTerminal {
                id: current.id.clone(),
                status: current.status,
            });
        }

        let outcome = JobOutcome::success(id.clone(), result);
        Ok(self.jobs.save(lock, JobUpdate::done(outcome, labels)).await?)
    }

    /// Mark the job `FAILED`. Problems doing so are logged, not returned.
    async fn record_failure(&self, id: &JobId, error: &WorkerError, logger: &JobLogger) {
        let lock = match self.jobs.get_for_update(id).await {
            Ok(lock) => lock,
            Err(e) => {
                logger.log_error(&format!("could not lock job to record failure: {}", e));
                return;
            }
        };

        if lock.job().is_terminal() {
            debug!(job_id = %id, status = %lock.job().status, "Job already terminal, failure not recorded");
            return;
        }

        match self.jobs.save(lock, JobUpdate::failed(error.to_string())).await {
            Ok(job) => logger.log_transition(job.status, job.progress),
            Err(e) => logger.log_error(&format!("could not record failure: {}", e)),
        }
    }
}

/// Normalize, reading the image header when the model omitted its size.
pub(crate) async fn normalize_with_size(raw: &RawPrediction, image: &ImageRef) -> DetectionResult {
    let mut result = normalize(raw);
    if raw.image_size().is_none() {
        if let Some((width, height)) = header_dimensions(image.as_str()).await {
            result.image_width = width;
            result.image_height = height;
        }
    }
    result
}

/// Read width and height from the image header, if the file is a readable image.
async fn header_dimensions(path: &str) -> Option<(u32, u32)> {
    let path = Path::new(path).to_path_buf();
    tokio::task::spawn_blocking(move || image::image_dimensions(&path).ok())
        .await
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use obbd_inference::{InferenceError, InferenceResult, ModelSpec};
    use obbd_jobstore::InMemoryJobStore;
    use obbd_models::JobStatus;
    use obbd_storage::MemoryArtifactStore;

    struct FixedBackend(serde_json::Value);

    #[async_trait]
    impl InferenceBackend for FixedBackend {
        async fn infer(&self, _: &ImageRef, _: &ModelSpec, _: f64) -> InferenceResult<RawPrediction> {
            Ok(serde_json::from_value(self.0.clone())?)
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl InferenceBackend for FailingBackend {
        async fn infer(&self, _: &ImageRef, _: &ModelSpec, _: f64) -> InferenceResult<RawPrediction> {
            Err(InferenceError::ServiceUnavailable("model crashed".to_string()))
        }
    }

    /// Answers after a pause, so overlapping deliveries both reach the model.
    struct SlowBackend(serde_json::Value);

    #[async_trait]
    impl InferenceBackend for SlowBackend {
        async fn infer(&self, _: &ImageRef, _: &ModelSpec, _: f64) -> InferenceResult<RawPrediction> {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            Ok(serde_json::from_value(self.0.clone())?)
        }
    }

    struct Fixture {
        jobs: Arc<InMemoryJobStore>,
        artifacts: Arc<MemoryArtifactStore>,
        orchestrator: Orchestrator,
        _weights: tempfile::NamedTempFile,
    }

    fn fixture(backend: Arc<dyn InferenceBackend>) -> Fixture {
        let weights = tempfile::NamedTempFile::new().unwrap();
        let models = ModelRegistry::new().with_model("default", weights.path());
        let jobs = Arc::new(InMemoryJobStore::new());
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let orchestrator = Orchestrator::new(jobs.clone(), artifacts.clone(), backend, Arc::new(models));
        Fixture {
            jobs,
            artifacts,
            orchestrator,
            _weights: weights,
        }
    }

    async fn submit(jobs: &InMemoryJobStore, model: &str) -> DetectTask {
        let job = jobs.create(ImageRef::new("uploads/a.jpg"), model, 0.25).await.unwrap();
        DetectTask::for_job(&job)
    }

    #[tokio::test]
    async fn test_success_path() {
        let f = fixture(Arc::new(FixedBackend(json!({
            "orig_shape": [100, 200],
            "boxes": { "xyxy": [[10, 20, 30, 40]], "conf": [0.9], "cls": [0] }
        }))));
        let task = submit(&f.jobs, "default").await;

        let job = f.orchestrator.process(&task).await.unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress, 100);
        assert_eq!(job.labels_artifact_ref.as_ref().unwrap().as_str(), format!("labels/{}.txt", task.job_id));

        let doc = serde_json::to_value(job.result.as_ref().unwrap()).unwrap();
        assert_eq!(doc["success"], true);
        assert_eq!(doc["unique_id"], task.job_id.as_str());
        assert_eq!(doc["detection_count"], 1);
        assert_eq!(doc["image_width"], 200);

        let labels = f.artifacts.read(job.labels_artifact_ref.as_ref().unwrap()).await.unwrap();
        assert_eq!(labels, b"0\t0.900000\t10,20,30,40\n");
    }

    #[tokio::test]
    async fn test_inference_failure_marks_failed() {
        let f = fixture(Arc::new(FailingBackend));
        let task = submit(&f.jobs, "default").await;

        let err = f.orchestrator.process(&task).await.unwrap_err();
        assert!(matches!(err, WorkerError::Inference(_)));

        let job = f.jobs.get(&task.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 100);
        assert!(job.labels_artifact_ref.is_none());
        assert!(job.result.as_ref().unwrap().error().unwrap().contains("model crashed"));
        assert!(f.artifacts.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_weights_marks_failed() {
        let f = fixture(Arc::new(FailingBackend));
        let job = f.jobs.create(ImageRef::new("uploads/a.jpg"), "default", 0.25).await.unwrap();
        let models = ModelRegistry::new().with_model("default", "/nowhere/default.pt");
        let orchestrator = Orchestrator::new(f.jobs.clone(), f.artifacts.clone(), Arc::new(FailingBackend), Arc::new(models));

        let err = orchestrator.process(&DetectTask::for_job(&job)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Inference(InferenceError::ModelUnavailable(_))));

        let stored = f.jobs.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.result.unwrap().error().unwrap().contains("/nowhere/default.pt"));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let f = fixture(Arc::new(FixedBackend(json!({ "image_width": 1, "image_height": 1 }))));
        let task = submit(&f.jobs, "default").await;

        let done = f.orchestrator.process(&task).await.unwrap();
        let err = f.orchestrator.process(&task).await.unwrap_err();
        assert!(err.is_duplicate());

        let stored = f.jobs.get(&task.job_id).await.unwrap().unwrap();
        assert_eq!(stored, done);
    }

    #[tokio::test]
    async fn test_overlapping_deliveries_finish_once() {
        let f = fixture(Arc::new(SlowBackend(json!({
            "orig_shape": [10, 10],
            "boxes": { "xyxy": [[1, 1, 5, 5]], "conf": [0.7], "cls": [0] }
        }))));
        let task = submit(&f.jobs, "default").await;

        let (first, second) = tokio::join!(f.orchestrator.process(&task), f.orchestrator.process(&task));

        let (done, dup) = match (first, second) {
            (Ok(done), Err(dup)) | (Err(dup), Ok(done)) => (done, dup),
            (a, b) => panic!("expected one success and one duplicate, got {:?} and {:?}", a, b),
        };
        assert!(dup.is_duplicate(), "{}", dup);
        assert_eq!(done.status, JobStatus::Done);

        // The losing delivery must not overwrite the result with a failure.
        let stored = f.jobs.get(&task.job_id).await.unwrap().unwrap();
        assert_eq!(stored, done);
        assert!(stored.result.as_ref().unwrap().error().is_none());
        assert_eq!(f.artifacts.keys().await, vec![format!("labels/{}.txt", task.job_id)]);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let f = fixture(Arc::new(FailingBackend));
        let task = DetectTask::new(JobId::new(), ImageRef::new("uploads/a.jpg"), 0.25);
        let err = f.orchestrator.process(&task).await.unwrap_err();
        assert!(matches!(err, WorkerError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_size_falls_back_to_zero() {
        let f = fixture(Arc::new(FixedBackend(json!({ "boxes": { "xyxy": [] } }))));
        let task = submit(&f.jobs, "default").await;

        let job = f.orchestrator.process(&task).await.unwrap();
        let doc = serde_json::to_value(job.result.unwrap()).unwrap();
        assert_eq!(doc["image_width"], 0);
        assert_eq!(doc["image_height"], 0);
        assert_eq!(doc["detection_count"], 0);
    }
}
