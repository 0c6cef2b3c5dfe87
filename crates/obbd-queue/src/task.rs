//! Task messages.

use serde::{Deserialize, Serialize};

use obbd_models::{ImageRef, Job, JobId};

/// Request to run detection for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectTask {
    pub job_id: JobId,
    pub image_ref: ImageRef,
    pub confidence_threshold: f64,
}

impl DetectTask {
    pub fn new(job_id: JobId, image_ref: ImageRef, confidence_threshold: f64) -> Self {
        Self {
            job_id,
            image_ref,
            confidence_threshold,
        }
    }

    /// Task for an existing job record.
    pub fn for_job(job: &Job) -> Self {
        Self::new(job.id.clone(), job.image_ref.clone(), job.confidence_threshold)
    }
}

/// A task handed to a worker, with transport bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Transport message id (Redis stream entry id, or a local sequence)
    pub message_id: String,
    pub task: DetectTask,
    /// 1 on first delivery, incremented on each redelivery
    pub attempt: u32,
}
