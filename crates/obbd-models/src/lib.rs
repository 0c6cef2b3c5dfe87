//! Shared data models for the OBB detection pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Canonical detections and their 4-point polygon geometry
//! - Detection jobs, their status and the update rules they obey
//! - The result payload exposed to callers

pub mod detection;
pub mod job;
pub mod job_status;
pub mod outcome;

// Re-export common types
pub use detection::{BoundingBox, Detection, DetectionResult, Polygon4};
pub use job::{
    ArtifactRef, ImageRef, Job, JobId, JobTransitionError, JobUpdate, PROGRESS_COMPLETE,
    PROGRESS_PICKED_UP,
};
pub use job_status::JobStatus;
pub use outcome::JobOutcome;
