//! Terminal job payload.

use serde::{Deserialize, Serialize};

use crate::{Detection, DetectionResult, JobId};

/// What a job ended with.
///
/// Serializes to the flat `{ "success": bool, ... }` document clients read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "OutcomeWire", try_from = "OutcomeWire")]
pub enum JobOutcome {
    Success { unique_id: JobId, result: DetectionResult },
    Failure { error: String },
}

impl JobOutcome {
    pub fn success(unique_id: JobId, result: DetectionResult) -> Self {
        Self::Success { unique_id, result }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure { error: error.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Short name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
        }
    }

    pub fn detections(&self) -> &[Detection] {
        match self {
            Self::Success { result, .. } => &result.detections,
            Self::Failure { .. } => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure { error } => Some(error),
            Self::Success { .. } => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct OutcomeWire {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unique_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detection_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detections: Option<Vec<Detection>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<JobOutcome> for OutcomeWire {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Success { unique_id, result } => Self {
                success: true,
                unique_id: Some(unique_id),
                detection_count: Some(result.detections.len()),
                detections: Some(result.detections),
                image_width: Some(result.image_width),
                image_height: Some(result.image_height),
                error: None,
            },
            JobOutcome::Failure { error } => Self {
                success: false,
                unique_id: None,
                detection_count: None,
                detections: None,
                image_width: None,
                image_height: None,
                error: Some(error),
            },
        }
    }
}

impl TryFrom<OutcomeWire> for JobOutcome {
    type Error = String;

    fn try_from(wire: OutcomeWire) -> Result<Self, Self::Error> {
        if !wire.success {
            return Ok(JobOutcome::Failure {
                error: wire.error.unwrap_or_default(),
            });
        }

        let unique_id = wire.unique_id.ok_or("success outcome missing unique_id")?;
        let detections = wire.detections.unwrap_or_default();
        if let Some(count) = wire.detection_count {
            if count != detections.len() {
                return Err(format!(
                    "detection_count {} does not match {} detections",
                    count,
                    detections.len()
                ));
            }
        }

        Ok(JobOutcome::Success {
            unique_id,
            result: DetectionResult {
                image_width: wire.image_width.unwrap_or_default(),
                image_height: wire.image_height.unwrap_or_default(),
                detections,
            },
        })
    }
}
