//! Worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use obbd_queue::{Delivery, QueueError, RetryDecision, TaskSource};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::orchestrator::Orchestrator;

/// Pulls tasks from a [`TaskSource`] and runs them with bounded concurrency.
pub struct WorkerPool {
    config: WorkerConfig,
    source: Arc<dyn TaskSource>,
    orchestrator: Arc<Orchestrator>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig, source: Arc<dyn TaskSource>, orchestrator: Arc<Orchestrator>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            source,
            orchestrator,
            job_semaphore,
            shutdown,
        }
    }

    /// Run until [`WorkerPool::shutdown`] is called or the source closes.
    ///
    /// In-flight jobs get up to `shutdown_timeout` to finish.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting worker pool with {} max concurrent jobs",
            self.config.max_concurrent_jobs
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping worker pool");
                        break;
                    }
                }
                result = self.consume_one() => {
                    match result {
                        Ok(()) => {}
                        Err(WorkerError::Queue(QueueError::Closed)) => {
                            info!("Task source closed, stopping worker pool");
                            break;
                        }
                        Err(e) => {
                            error!("Error consuming tasks: {}", e);
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}",
                self.config.shutdown_timeout
            );
        }

        info!("Worker pool stopped");
        Ok(())
    }

    /// Take a slot, then one task for it.
    async fn consume_one(&self) -> WorkerResult<()> {
        let permit = self
            .job_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::config_error("worker semaphore closed"))?;

        let Some(delivery) = self.source.next().await? else {
            return Ok(());
        };

        debug!(
            job_id = %delivery.task.job_id,
            message_id = %delivery.message_id,
            attempt = delivery.attempt,
            "Received task"
        );

        let source = Arc::clone(&self.source);
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            let _permit = permit;
            Self::execute(orchestrator, source, delivery).await;
        });

        Ok(())
    }

    /// Run one delivery and settle it with the source.
    async fn execute(orchestrator: Arc<Orchestrator>, source: Arc<dyn TaskSource>, delivery: Delivery) {
        let job_id = delivery.task.job_id.clone();

        match orchestrator.process(&delivery.task).await {
            Ok(job) => {
                info!(job_id = %job_id, status = %job.status, "Task completed");
                Self::ack(&*source, &delivery).await;
            }
            Err(e) if e.is_duplicate() => {
                info!(job_id = %job_id, "Duplicate delivery ignored: {}", e);
                Self::ack(&*source, &delivery).await;
            }
            Err(e) if e.is_retryable() => {
                warn!(job_id = %job_id, attempt = delivery.attempt, "Task failed, may retry: {}", e);
                match source.retry_or_dead_letter(&delivery, &e.to_string()).await {
                    Ok(RetryDecision::DeadLettered) => crate::metrics::record_dead_letter(),
                    Ok(RetryDecision::Redeliver { attempt }) => {
                        debug!(job_id = %job_id, attempt, "Task scheduled for redelivery");
                    }
                    Err(qe) => error!(job_id = %job_id, "Failed to retry task: {}", qe),
                }
            }
            Err(e) => {
                // Already recorded on the job, nothing to redeliver.
                debug!(job_id = %job_id, "Task finished with error: {}", e);
                Self::ack(&*source, &delivery).await;
            }
        }
    }

    async fn ack(source: &dyn TaskSource, delivery: &Delivery) {
        if let Err(e) = source.ack(delivery).await {
            error!(job_id = %delivery.task.job_id, "Failed to ack task: {}", e);
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Number of jobs currently running.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent_jobs - self.job_semaphore.available_permits()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use obbd_geometry::RawPrediction;
    use obbd_inference::{InferenceBackend, InferenceResult, ModelRegistry, ModelSpec};
    use obbd_jobstore::{InMemoryJobStore, JobStore};
    use obbd_models::{ImageRef, JobStatus};
    use obbd_queue::{DetectTask, MemoryQueue, TaskDispatcher};
    use obbd_storage::MemoryArtifactStore;

    struct EmptyBackend;

    #[async_trait]
    impl InferenceBackend for EmptyBackend {
        async fn infer(&self, _: &ImageRef, _: &ModelSpec, _: f64) -> InferenceResult<RawPrediction> {
            Ok(RawPrediction::default())
        }
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops() {
        let weights = tempfile::NamedTempFile::new().unwrap();
        let models = ModelRegistry::new().with_model("default", weights.path());
        let jobs = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new(3).with_poll_interval(Duration::from_millis(20)));
        let orchestrator = Arc::new(Orchestrator::new(
            jobs.clone(),
            Arc::new(MemoryArtifactStore::new()),
            Arc::new(EmptyBackend),
            Arc::new(models),
        ));

        let mut ids = Vec::new();
        for _ in 0..4 {
            let job = jobs.create(ImageRef::new("a.jpg"), "default", 0.25).await.unwrap();
            queue.enqueue(DetectTask::for_job(&job)).await.unwrap();
            ids.push(job.id);
        }

        let pool = Arc::new(WorkerPool::new(
            WorkerConfig {
                max_concurrent_jobs: 2,
                shutdown_timeout: Duration::from_secs(5),
                ..Default::default()
            },
            queue.clone(),
            orchestrator,
        ));
        let runner = tokio::spawn({
            let pool = pool.clone();
            async move { pool.run().await }
        });

        for _ in 0..100 {
            let mut done = 0;
            for id in &ids {
                if jobs.get(id).await.unwrap().unwrap().status == JobStatus::Done {
                    done += 1;
                }
            }
            if done == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        pool.shutdown();
        runner.await.unwrap().unwrap();

        for id in &ids {
            assert_eq!(jobs.get(id).await.unwrap().unwrap().status, JobStatus::Done);
        }
        assert_eq!(pool.in_flight(), 0);
        assert!(queue.dead_letters().await.is_empty());
    }
}
