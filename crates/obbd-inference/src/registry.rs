//! Named detection models.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{InferenceError, InferenceResult};

/// Directory weights are looked up in when no override is set.
pub const DEFAULT_MODEL_DIR: &str = "/app/models";

/// A model id and the weights it runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: String,
    pub weights: PathBuf,
}

impl ModelSpec {
    /// Error unless the weights file exists locally.
    pub fn check_weights(&self) -> InferenceResult<()> {
        if self.weights.is_file() {
            Ok(())
        } else {
            Err(InferenceError::model_unavailable(self.weights.display().to_string()))
        }
    }
}

/// Registry of the models this deployment can run.
///
/// Built once at startup and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a model.
    pub fn with_model(mut self, id: impl Into<String>, weights: impl Into<PathBuf>) -> Self {
        self.register(id, weights);
        self
    }

    pub fn register(&mut self, id: impl Into<String>, weights: impl Into<PathBuf>) {
        let id = id.into();
        let spec = ModelSpec {
            id: id.clone(),
            weights: weights.into(),
        };
        debug!("Registered model {} -> {}", spec.id, spec.weights.display());
        self.models.insert(id, spec);
    }

    /// Build from environment variables.
    ///
    /// - `MODELS`: comma-separated model ids (default `default`)
    /// - `MODEL_DIR`: fallback weights directory (default `/app/models`)
    /// - `MODEL_<ID>`: weights path override for one model
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, using the same keys as [`ModelRegistry::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let dir = lookup("MODEL_DIR").unwrap_or_else(|| DEFAULT_MODEL_DIR.to_string());
        let ids = lookup("MODELS").unwrap_or_else(|| "default".to_string());

        let mut registry = Self::new();
        for id in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let weights = lookup(&override_key(id))
                .map(PathBuf::from)
                .unwrap_or_else(|| Path::new(&dir).join(format!("{}.pt", id)));
            registry.register(id, weights);
        }

        info!("Model registry: {:?}", registry.ids());
        registry
    }

    pub fn ids(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.models.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Look up a model without touching the filesystem.
    pub fn lookup(&self, id: &str) -> InferenceResult<&ModelSpec> {
        self.models.get(id).ok_or_else(|| InferenceError::UnknownModel {
            model: id.to_string(),
            valid: self.ids(),
        })
    }
}

/// `spike-v2` -> `MODEL_SPIKE_V2`.
fn override_key(id: &str) -> String {
    let suffix: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("MODEL_{}", suffix)
}
