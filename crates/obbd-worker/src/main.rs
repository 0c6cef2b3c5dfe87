//! Detection pipeline command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use obbd_inference::{HttpInferenceClient, InferenceBackend, ModelRegistry};
use obbd_jobstore::{InMemoryJobStore, JobStore};
use obbd_models::{Job, JobId};
use obbd_queue::{MemoryQueue, QueueConfig, RedisQueue, TaskDispatcher, TaskSource};
use obbd_storage::LocalArtifactStore;
use obbd_worker::{
    metrics, DetectRequest, DetectionService, Orchestrator, ServiceError, WorkerConfig, WorkerPool,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Oriented-box detection over images
#[derive(Parser, Debug)]
#[command(name = "obbd", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a model on one image and print the result
    Detect {
        /// Image file
        #[arg(long, value_name = "FILE")]
        image: PathBuf,

        #[command(flatten)]
        options: DetectOptions,
    },

    /// Submit images as jobs, process them and print the job records
    Submit {
        /// Image files
        #[arg(required = true, value_name = "FILE")]
        images: Vec<PathBuf>,

        #[command(flatten)]
        options: DetectOptions,

        /// Concurrent jobs
        #[arg(long, env = "WORKER_MAX_JOBS", value_name = "COUNT")]
        jobs: Option<usize>,

        /// Directory label files are written to
        #[arg(long, env = "ARTIFACT_ROOT", value_name = "DIR")]
        artifact_root: Option<PathBuf>,

        /// Seconds to wait for the jobs to finish
        #[arg(long, env = "SUBMIT_TIMEOUT", value_name = "SECS", default_value_t = 600)]
        timeout: u64,
    },
}

#[derive(Args, Debug)]
struct DetectOptions {
    /// Model id
    #[arg(long, env = "DEFAULT_MODEL", value_name = "ID")]
    model: Option<String>,

    /// Minimum confidence (0.0 - 1.0)
    #[arg(long, value_name = "THRESHOLD")]
    confidence: Option<f64>,
}

impl DetectOptions {
    fn request(&self, image: &std::path::Path) -> DetectRequest {
        DetectRequest {
            image: obbd_models::ImageRef::new(image.to_string_lossy()),
            model: self.model.clone(),
            confidence: self.confidence,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = WorkerConfig::from_env();

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr).context("failed to start metrics exporter")?;
    }

    match cli.command {
        Command::Detect { image, options } => {
            let service = Runtime::build(&config).await?.service;
            let result = service
                .detect_now(options.request(&image))
                .await
                .map_err(report)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Submit {
            images,
            options,
            jobs,
            artifact_root,
            timeout,
        } => {
            if let Some(jobs) = jobs.filter(|n| *n > 0) {
                config.max_concurrent_jobs = jobs;
            }
            if let Some(root) = artifact_root {
                config.artifact_root = root;
            }
            let records =
                submit_all(&config, &images, &options, Duration::from_secs(timeout)).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);

            let unfinished = records.iter().filter(|job| !job.is_terminal()).count();
            if unfinished > 0 {
                bail!("{} of {} jobs did not finish", unfinished, records.len());
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("obbd=info,warn"));

    // Logs go to stderr; stdout carries the JSON output.
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true),
            )
            .with(env_filter)
            .init();
    }
}

/// Everything the commands share.
struct Runtime {
    jobs: Arc<InMemoryJobStore>,
    source: Arc<dyn TaskSource>,
    orchestrator: Arc<Orchestrator>,
    service: DetectionService,
}

impl Runtime {
    async fn build(config: &WorkerConfig) -> anyhow::Result<Self> {
        let models = Arc::new(ModelRegistry::from_env());
        if models.is_empty() {
            bail!("no models configured, set MODELS");
        }

        let inference: Arc<dyn InferenceBackend> =
            Arc::new(HttpInferenceClient::from_env().context("failed to create inference client")?);
        let artifacts = Arc::new(LocalArtifactStore::new(config.artifact_root.clone()));
        let jobs = Arc::new(InMemoryJobStore::new());

        let (dispatcher, source) = if config.uses_redis() {
            // Job records live in this process, so its tasks must not reach
            // consumers in other processes.
            let queue_config = QueueConfig {
                redis_url: config.queue_url.clone(),
                ..QueueConfig::from_env()
            }
            .scoped(&Uuid::new_v4().simple().to_string());
            let stream = queue_config.stream_name.clone();
            let queue = Arc::new(RedisQueue::new(queue_config).context("failed to create Redis queue")?);
            queue.init().await.context("failed to initialize Redis queue")?;
            info!(stream = %stream, "Using Redis task queue");
            split(queue)
        } else {
            split(Arc::new(MemoryQueue::default()))
        };

        let orchestrator = Arc::new(Orchestrator::new(
            jobs.clone(),
            artifacts.clone(),
            inference.clone(),
            models.clone(),
        ));
        let service = DetectionService::new(
            jobs.clone(),
            dispatcher,
            artifacts,
            inference,
            models,
            config.default_model.clone(),
        );

        Ok(Self {
            jobs,
            source,
            orchestrator,
            service,
        })
    }
}

fn split<Q>(queue: Arc<Q>) -> (Arc<dyn TaskDispatcher>, Arc<dyn TaskSource>)
where
    Q: TaskDispatcher + TaskSource + 'static,
{
    (queue.clone(), queue)
}

async fn submit_all(
    config: &WorkerConfig,
    images: &[PathBuf],
    options: &DetectOptions,
    limit: Duration,
) -> anyhow::Result<Vec<Job>> {
    let runtime = Runtime::build(config).await?;

    let mut ids: Vec<JobId> = Vec::with_capacity(images.len());
    for image in images {
        match runtime.service.submit(options.request(image)).await {
            Ok(id) => ids.push(id),
            Err(e) => warn!(image = %image.display(), "Rejected: {}", e),
        }
    }
    if ids.is_empty() {
        bail!("no images were accepted");
    }
    info!("Submitted {} jobs", ids.len());

    let pool = Arc::new(WorkerPool::new(
        config.clone(),
        runtime.source.clone(),
        runtime.orchestrator.clone(),
    ));
    let runner = tokio::spawn({
        let pool = pool.clone();
        async move { pool.run().await }
    });

    let records = tokio::select! {
        records = wait_terminal(&*runtime.jobs, &ids, limit) => records?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            collect(&*runtime.jobs, &ids).await?
        }
    };

    pool.shutdown();
    runner.await.context("worker pool panicked")??;
    Ok(records)
}

/// Poll until every job is terminal or `limit` has passed.
async fn wait_terminal(jobs: &dyn JobStore, ids: &[JobId], limit: Duration) -> anyhow::Result<Vec<Job>> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let records = collect(jobs, ids).await?;
        if records.iter().all(Job::is_terminal) {
            return Ok(records);
        }
        if tokio::time::Instant::now() >= deadline {
            warn!("Stopped waiting after {:?}", limit);
            return Ok(records);
        }
        tokio::time::sleep(POLL_INTERVAL.min(limit)).await;
    }
}

async fn collect(jobs: &dyn JobStore, ids: &[JobId]) -> anyhow::Result<Vec<Job>> {
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        let job = jobs
            .get(id)
            .await?
            .with_context(|| format!("job {} disappeared", id))?;
        records.push(job);
    }
    Ok(records)
}

fn report(e: ServiceError) -> anyhow::Error {
    let body = serde_json::to_string(&e.body()).unwrap_or_else(|_| e.to_string());
    anyhow::anyhow!("{} ({})", body, e.status_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use obbd_models::{ImageRef, JobStatus, JobUpdate};

    #[tokio::test]
    async fn test_wait_terminal_gives_up_at_limit() {
        let jobs = InMemoryJobStore::new();
        let job = jobs.create(ImageRef::new("a.jpg"), "default", 0.25).await.unwrap();

        let started = std::time::Instant::now();
        let records = wait_terminal(&jobs, &[job.id.clone()], Duration::from_millis(50))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_wait_terminal_returns_finished_jobs() {
        let jobs = InMemoryJobStore::new();
        let job = jobs.create(ImageRef::new("a.jpg"), "default", 0.25).await.unwrap();
        let lock = jobs.get_for_update(&job.id).await.unwrap();
        jobs.save(lock, JobUpdate::failed("no queue")).await.unwrap();

        let records = wait_terminal(&jobs, &[job.id], Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(records[0].status, JobStatus::Failed);
    }
}
