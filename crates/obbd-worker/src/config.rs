//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Root directory for label artifacts
    pub artifact_root: PathBuf,
    /// Model used when a request names none
    pub default_model: String,
    /// `memory` or a `redis://` URL
    pub queue_url: String,
    /// Prometheus listener, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            shutdown_timeout: Duration::from_secs(30),
            artifact_root: PathBuf::from("./media"),
            default_model: "default".to_string(),
            queue_url: "memory".to_string(),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(2),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            artifact_root: std::env::var("ARTIFACT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./media")),
            default_model: std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| "default".to_string()),
            queue_url: std::env::var("QUEUE_URL").unwrap_or_else(|_| "memory".to_string()),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Whether tasks go through Redis rather than an in-process channel.
    pub fn uses_redis(&self) -> bool {
        self.queue_url.starts_with("redis://") || self.queue_url.starts_with("rediss://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert!(!config.uses_redis());
    }

    #[test]
    fn test_redis_url_detection() {
        let config = WorkerConfig {
            queue_url: "redis://localhost:6379".to_string(),
            ..Default::default()
        };
        assert!(config.uses_redis());
    }
}
