//! Model inference for detection jobs.
//!
//! This crate provides a client for the model server, which runs the
//! detection weights and returns raw predictions. It also owns the
//! registry of named models and their weight files.

pub mod backend;
pub mod client;
pub mod error;
pub mod registry;
pub mod types;

pub use backend::InferenceBackend;
pub use client::{HttpInferenceClient, InferenceClientConfig};
pub use error::{InferenceError, InferenceResult};
pub use registry::{ModelRegistry, ModelSpec, DEFAULT_MODEL_DIR};
