//! Model server HTTP client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use obbd_geometry::RawPrediction;
use obbd_models::ImageRef;

use crate::backend::InferenceBackend;
use crate::error::{InferenceError, InferenceResult};
use crate::registry::ModelSpec;
use crate::types::{ErrorResponse, HealthResponse};

/// Configuration for the inference client.
#[derive(Debug, Clone)]
pub struct InferenceClientConfig {
    /// Base URL of the model server
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
}

impl Default for InferenceClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }
}

impl InferenceClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("INFERENCE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout: Duration::from_secs(
                std::env::var("INFERENCE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            max_retries: std::env::var("INFERENCE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        }
    }
}

/// Client for the model server.
///
/// Sends the image as multipart form data to `POST /predict` and reads back
/// a [`RawPrediction`].
pub struct HttpInferenceClient {
    http: Client,
    config: InferenceClientConfig,
}

impl HttpInferenceClient {
    /// Create a new inference client.
    pub fn new(config: InferenceClientConfig) -> InferenceResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(InferenceError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> InferenceResult<Self> {
        Self::new(InferenceClientConfig::from_env())
    }

    /// Check if the model server is healthy.
    pub async fn health_check(&self) -> InferenceResult<bool> {
        let url = format!("{}/health", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Inference health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Inference health check error: {}", e);
                Ok(false)
            }
        }
    }

    async fn predict(
        &self,
        file_name: &str,
        bytes: &[u8],
        model: &ModelSpec,
        min_confidence: f64,
    ) -> InferenceResult<RawPrediction> {
        let url = format!("{}/predict", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .multipart(
                Form::new()
                    .part("image", Part::bytes(bytes.to_vec()).file_name(file_name.to_string()))
                    .text("model", model.id.clone())
                    .text("weights", model.weights.display().to_string())
                    .text("conf", min_confidence.to_string()),
            )
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(self.config.timeout.as_secs())
                } else {
                    InferenceError::Network(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            return serde_json::from_str(&body)
                .map_err(|e| InferenceError::InvalidResponse(format!("{}: {}", e, body)));
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.detail)
            .ok()
            .filter(|d| !d.is_empty())
            .unwrap_or(body);

        Err(match status {
            StatusCode::NOT_FOUND => InferenceError::ModelUnavailable(detail),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                InferenceError::InvalidImage(detail)
            }
            s if s.is_server_error() => {
                InferenceError::ServiceUnavailable(format!("model server returned {}: {}", s, detail))
            }
            s => InferenceError::RequestFailed(format!("model server returned {}: {}", s, detail)),
        })
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> InferenceResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = InferenceResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Inference request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| InferenceError::RequestFailed("Unknown error".to_string())))
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceClient {
    async fn infer(
        &self,
        image: &ImageRef,
        model: &ModelSpec,
        min_confidence: f64,
    ) -> InferenceResult<RawPrediction> {
        let path = Path::new(image.as_str());
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| InferenceError::invalid_image(format!("{}: {}", image, e)))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        debug!(
            model = %model.id,
            image = %image,
            bytes = bytes.len(),
            "Sending inference request to {}", self.config.base_url
        );

        self.with_retry(|| self.predict(&file_name, &bytes, model, min_confidence))
            .await
    }

    /// Weights live with the model server, which answers 404 when they are
    /// missing.
    fn check_model(&self, _model: &ModelSpec) -> InferenceResult<()> {
        Ok(())
    }
}
