//! Detection job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::{JobOutcome, JobStatus};

/// Progress recorded when a worker picks the job up.
pub const PROGRESS_PICKED_UP: u8 = 10;

/// Progress recorded on either terminal state.
pub const PROGRESS_COMPLETE: u8 = 100;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addressable image resource (a filesystem path or storage key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable reference to a stored artifact, as returned by the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reasons a [`JobUpdate`] is refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobTransitionError {
    #[error("job {id} is already {status}")]
    Terminal { id: JobId, status: JobStatus },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("progress may not go from {current} back to {requested}")]
    ProgressRegressed { current: u8, requested: u8 },

    #[error("progress {0} is outside 0..=100")]
    ProgressOutOfRange(u8),

    #[error("result is already set")]
    ResultAlreadySet,

    #[error("result may only be set on a terminal status, not {0}")]
    ResultBeforeTerminal(JobStatus),

    #[error("terminal status {0} requires a result")]
    MissingResult(JobStatus),

    #[error("{status} does not match a {outcome} result")]
    OutcomeMismatch { status: JobStatus, outcome: &'static str },

    #[error("labels artifact may only be set on DONE, not {0}")]
    LabelsOutsideDone(JobStatus),

    #[error("DONE requires a labels artifact")]
    MissingLabels,
}

/// A detection job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Image the job runs on
    pub image_ref: ImageRef,

    /// Model the job runs with
    pub model_id: String,

    /// Current status
    pub status: JobStatus,

    /// Progress (0-100), never decreases
    pub progress: u8,

    /// Minimum confidence passed to the model
    pub confidence_threshold: f64,

    /// Terminal payload, set exactly once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutcome>,

    /// Label file reference, only on DONE
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels_artifact_ref: Option<ArtifactRef>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job that has been accepted and is about to be dispatched.
    pub fn new(image_ref: ImageRef, model_id: impl Into<String>, confidence_threshold: f64) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            image_ref,
            model_id: model_id.into(),
            status: JobStatus::Queued,
            progress: 0,
            confidence_threshold,
            result: None,
            labels_artifact_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply an update, or refuse it without touching the record.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), JobTransitionError> {
        if self.status.is_terminal() {
            return Err(JobTransitionError::Terminal {
                id: self.id.clone(),
                status: self.status,
            });
        }

        let target = update.status.unwrap_or(self.status);
        if target != self.status && !self.status.can_transition_to(target) {
            return Err(JobTransitionError::IllegalTransition {
                from: self.status,
                to: target,
            });
        }
        if let Some(progress) = update.progress {
            if progress > PROGRESS_COMPLETE {
                return Err(JobTransitionError::ProgressOutOfRange(progress));
            }
            if progress < self.progress {
                return Err(JobTransitionError::ProgressRegressed {
                    current: self.progress,
                    requested: progress,
                });
            }
        }

        match &update.result {
            Some(_) if self.result.is_some() => return Err(JobTransitionError::ResultAlreadySet),
            Some(_) if !target.is_terminal() => {
                return Err(JobTransitionError::ResultBeforeTerminal(target))
            }
            Some(outcome) => {
                let matches = match target {
                    JobStatus::Done => outcome.is_success(),
                    _ => !outcome.is_success(),
                };
                if !matches {
                    return Err(JobTransitionError::OutcomeMismatch {
                        status: target,
                        outcome: outcome.kind(),
                    });
                }
            }
            None if target.is_terminal() => return Err(JobTransitionError::MissingResult(target)),
            None => {}
        }

        if update.labels_artifact_ref.is_some() && target != JobStatus::Done {
            return Err(JobTransitionError::LabelsOutsideDone(target));
        }
        if target == JobStatus::Done && update.labels_artifact_ref.is_none() {
            return Err(JobTransitionError::MissingLabels);
        }

        self.status = target;
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
        if let Some(labels) = update.labels_artifact_ref {
            self.labels_artifact_ref = Some(labels);
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Field-masked update to a job record.
///
/// Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub result: Option<JobOutcome>,
    pub labels_artifact_ref: Option<ArtifactRef>,
}

impl JobUpdate {
    /// Worker pickup.
    pub fn processing() -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(PROGRESS_PICKED_UP),
            ..Default::default()
        }
    }

    /// Successful completion.
    pub fn done(outcome: JobOutcome, labels: ArtifactRef) -> Self {
        Self {
            status: Some(JobStatus::Done),
            progress: Some(PROGRESS_COMPLETE),
            result: Some(outcome),
            labels_artifact_ref: Some(labels),
        }
    }

    /// Failure with an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            progress: Some(PROGRESS_COMPLETE),
            result: Some(JobOutcome::failure(error)),
            labels_artifact_ref: None,
        }
    }

    /// Names of the fields this update writes.
    pub fn field_mask(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.status.is_some() {
            fields.push("status");
        }
        if self.progress.is_some() {
            fields.push("progress");
        }
        if self.result.is_some() {
            fields.push("result");
        }
        if self.labels_artifact_ref.is_some() {
            fields.push("labels_artifact_ref");
        }
        fields
    }
}
