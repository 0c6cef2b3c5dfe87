//! Detection job worker.
//!
//! This crate provides:
//! - The job orchestrator (lock, infer, normalize, write labels, finish)
//! - A worker pool with bounded concurrency, retry/DLQ and graceful shutdown
//! - The intake service for synchronous and asynchronous detection
//! - Structured job logging and metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod intake;
pub mod logging;
pub mod metrics;
pub mod orchestrator;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::WorkerPool;
pub use intake::{
    DetectRequest, DetectionService, ErrorBody, ServiceError, ServiceResult, ASYNC_DEFAULT_CONFIDENCE,
    SYNC_DEFAULT_CONFIDENCE,
};
pub use logging::JobLogger;
pub use orchestrator::Orchestrator;
