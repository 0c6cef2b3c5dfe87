//! Prometheus metrics for detection jobs.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "obbd_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "obbd_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "obbd_jobs_failed_total";
    pub const JOBS_SUBMITTED_TOTAL: &str = "obbd_jobs_submitted_total";
    pub const TASKS_DEAD_LETTERED_TOTAL: &str = "obbd_tasks_dead_lettered_total";
    pub const DETECTIONS_PER_JOB: &str = "obbd_detections_per_job";
    pub const INFERENCE_DURATION_SECONDS: &str = "obbd_inference_duration_seconds";
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))?;
    info!("Serving metrics on {}", addr);
    Ok(())
}

pub fn record_job_submitted(model: &str) {
    counter!(names::JOBS_SUBMITTED_TOTAL, "model" => model.to_string()).increment(1);
}

pub fn record_job_started(model: &str) {
    counter!(names::JOBS_STARTED_TOTAL, "model" => model.to_string()).increment(1);
}

pub fn record_job_completed(model: &str, detections: usize) {
    counter!(names::JOBS_COMPLETED_TOTAL, "model" => model.to_string()).increment(1);
    histogram!(names::DETECTIONS_PER_JOB, "model" => model.to_string()).record(detections as f64);
}

pub fn record_job_failed(model: &str) {
    counter!(names::JOBS_FAILED_TOTAL, "model" => model.to_string()).increment(1);
}

pub fn record_inference(model: &str, elapsed: Duration) {
    histogram!(names::INFERENCE_DURATION_SECONDS, "model" => model.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_dead_letter() {
    counter!(names::TASKS_DEAD_LETTERED_TOTAL).increment(1);
}
