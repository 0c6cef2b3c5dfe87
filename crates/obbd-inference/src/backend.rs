//! Inference seam.

use async_trait::async_trait;

use obbd_geometry::RawPrediction;
use obbd_models::ImageRef;

use crate::error::InferenceResult;
use crate::registry::ModelSpec;

/// Runs a detection model over one image.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Predictions below `min_confidence` are dropped by the model.
    async fn infer(
        &self,
        image: &ImageRef,
        model: &ModelSpec,
        min_confidence: f64,
    ) -> InferenceResult<RawPrediction>;

    /// Fail early when `model` cannot be served.
    ///
    /// Defaults to looking for the weights file on this host.
    fn check_model(&self, model: &ModelSpec) -> InferenceResult<()> {
        model.check_weights()
    }
}
