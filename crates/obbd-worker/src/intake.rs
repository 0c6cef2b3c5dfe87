//! Detection intake.
//!
//! Entry points for callers: run a model right now, submit a job for the
//! worker pool, poll job status and fetch label files.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use obbd_inference::{InferenceBackend, InferenceError, ModelRegistry, ModelSpec};
use obbd_jobstore::{JobStore, JobStoreError};
use obbd_models::{ArtifactRef, DetectionResult, ImageRef, Job, JobId, JobUpdate};
use obbd_queue::{DetectTask, QueueError, TaskDispatcher};
use obbd_storage::{resolve_label_download, ArtifactStore, StorageError};

use crate::orchestrator::normalize_with_size;

/// Confidence floor for synchronous detection when none is given.
pub const SYNC_DEFAULT_CONFIDENCE: f64 = 0.05;

/// Confidence floor for submitted jobs when none is given.
pub const ASYNC_DEFAULT_CONFIDENCE: f64 = 0.25;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned to intake callers.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP-style status class for the error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::InvalidInput(_) => 400,
            ServiceError::NotFound(_) | ServiceError::ModelUnavailable(_) => 404,
            ServiceError::Inference(_) | ServiceError::Internal(_) => 500,
        }
    }

    /// Body sent back to the caller.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            detail: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl From<InferenceError> for ServiceError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::UnknownModel { .. } | InferenceError::InvalidImage(_) => {
                ServiceError::InvalidInput(e.to_string())
            }
            InferenceError::ModelUnavailable(path) => ServiceError::ModelUnavailable(path),
            other => ServiceError::Inference(other.to_string()),
        }
    }
}

impl From<JobStoreError> for ServiceError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(id) => ServiceError::NotFound(format!("job {}", id)),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for ServiceError {
    fn from(e: QueueError) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => ServiceError::NotFound(key),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

/// A detection request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectRequest {
    /// Path of the uploaded image
    pub image: ImageRef,
    /// Model id, the service default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Minimum confidence in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl DetectRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: ImageRef::new(image),
            model: None,
            confidence: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Request after validation.
struct Validated<'a> {
    image: ImageRef,
    model: &'a ModelSpec,
    confidence: f64,
}

/// Detection intake service.
pub struct DetectionService {
    jobs: Arc<dyn JobStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    artifacts: Arc<dyn ArtifactStore>,
    inference: Arc<dyn InferenceBackend>,
    models: Arc<ModelRegistry>,
    default_model: String,
}

impl DetectionService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        artifacts: Arc<dyn ArtifactStore>,
        inference: Arc<dyn InferenceBackend>,
        models: Arc<ModelRegistry>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            dispatcher,
            artifacts,
            inference,
            models,
            default_model: default_model.into(),
        }
    }

    /// Run a model on an image and return the normalized result.
    pub async fn detect_now(&self, request: DetectRequest) -> ServiceResult<DetectionResult> {
        let checked = self.validate(request, SYNC_DEFAULT_CONFIDENCE).await?;
        let model = checked.model;
        self.inference.check_model(model)?;

        let started = Instant::now();
        let raw = self
            .inference
            .infer(&checked.image, model, checked.confidence)
            .await?;
        crate::metrics::record_inference(&model.id, started.elapsed());

        let result = normalize_with_size(&raw, &checked.image).await;
        info!(
            model = %model.id,
            image = %checked.image,
            detections = result.detection_count(),
            "Synchronous detection finished"
        );
        Ok(result)
    }

    /// Create a job and queue it for the worker pool.
    ///
    /// Missing weights are not checked here: the job fails when it runs. A job
    /// whose task cannot be enqueued is marked `FAILED` before the error is
    /// returned.
    pub async fn submit(&self, request: DetectRequest) -> ServiceResult<JobId> {
        let checked = self.validate(request, ASYNC_DEFAULT_CONFIDENCE).await?;
        let model_id = checked.model.id.clone();

        let job = self
            .jobs
            .create(checked.image, &model_id, checked.confidence)
            .await?;
        if let Err(e) = self.dispatcher.enqueue(DetectTask::for_job(&job)).await {
            error!(job_id = %job.id, "Failed to enqueue job: {}", e);
            self.fail_undispatched(&job.id, &e).await;
            return Err(e.into());
        }

        crate::metrics::record_job_submitted(&model_id);
        info!(job_id = %job.id, model = %model_id, "Job submitted");
        Ok(job.id)
    }

    /// Current record of a job.
    pub async fn status(&self, id: &JobId) -> ServiceResult<Job> {
        self.jobs
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("job {}", id)))
    }

    /// All jobs, newest first.
    pub async fn list_jobs(&self) -> ServiceResult<Vec<Job>> {
        Ok(self.jobs.list().await?)
    }

    /// Bytes of a label file, by file name.
    pub async fn download_labels(&self, file_name: &str) -> ServiceResult<Vec<u8>> {
        let Some(key) = resolve_label_download(file_name) else {
            warn!(file_name = %file_name, "Refused label download");
            return Err(ServiceError::not_found(file_name));
        };
        Ok(self.artifacts.read(&ArtifactRef::new(key)).await?)
    }

    /// Resolve a job whose task never reached the queue.
    async fn fail_undispatched(&self, id: &JobId, cause: &QueueError) {
        let update = JobUpdate::failed(format!("could not enqueue job: {}", cause));
        let saved = match self.jobs.get_for_update(id).await {
            Ok(lock) => self.jobs.save(lock, update).await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            error!(job_id = %id, "Failed to mark undispatched job as failed: {}", e);
        }
    }

    async fn validate(&self, request: DetectRequest, default_confidence: f64) -> ServiceResult<Validated<'_>> {
        let is_file = tokio::fs::metadata(request.image.as_str())
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(ServiceError::invalid_input(format!(
                "image not found: {}",
                request.image
            )));
        }

        let confidence = request.confidence.unwrap_or(default_confidence);
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ServiceError::invalid_input(format!(
                "confidence must be between 0 and 1, got {}",
                confidence
            )));
        }

        let model_id = request.model.as_deref().unwrap_or(&self.default_model);
        let model = self.models.lookup(model_id)?;

        Ok(Validated {
            image: request.image,
            model,
            confidence,
        })
    }
}
