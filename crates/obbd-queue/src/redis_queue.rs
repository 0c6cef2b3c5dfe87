//! Task queue using Redis Streams.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{RetryDecision, TaskDispatcher, TaskSource};
use crate::error::{QueueError, QueueResult};
use crate::task::{Delivery, DetectTask};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for tasks
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Max delivery attempts before DLQ
    pub max_retries: u32,
    /// Idle time after which an unacknowledged task is redelivered
    pub visibility_timeout: Duration,
    /// How often to look for tasks to redeliver
    pub claim_interval: Duration,
    /// How long one read blocks waiting for new tasks
    pub block_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "obbd:tasks".to_string(),
            consumer_group: "obbd:workers".to_string(),
            dlq_stream_name: "obbd:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600),
            claim_interval: Duration::from_secs(30),
            block_timeout: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("QUEUE_CLAIM_INTERVAL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            block_timeout: defaults.block_timeout,
        }
    }

    /// Give the task stream and consumer group a private suffix.
    ///
    /// Needed when job records live in process memory: a shared group would
    /// hand this process's tasks to workers that cannot see the jobs. The
    /// dead-letter stream stays shared.
    pub fn scoped(mut self, scope: &str) -> Self {
        self.stream_name = format!("{}:{}", self.stream_name, scope);
        self.consumer_group = format!("{}:{}", self.consumer_group, scope);
        self
    }
}

/// Redis Streams queue client.
///
/// Tasks stay pending in the consumer group until acknowledged. A task that
/// is neither acknowledged nor dead-lettered is claimed again once it has
/// been idle for `visibility_timeout`, which also covers crashed workers.
pub struct RedisQueue {
    client: redis::Client,
    config: QueueConfig,
    consumer_name: String,
    last_claim: Mutex<Instant>,
}

impl RedisQueue {
    /// Create a new queue client.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
            last_claim: Mutex::new(Instant::now()),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Create the consumer group if it does not exist.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }
        Ok(())
    }

    /// Read one new task for this consumer.
    async fn read_new(&self) -> QueueResult<Option<Delivery>> {
        let mut conn = self.connection().await?;

        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_timeout.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                if let Some(delivery) = self.to_delivery(entry).await? {
                    return Ok(Some(delivery));
                }
            }
        }
        Ok(None)
    }

    /// Claim one task that has been pending longer than the visibility timeout.
    async fn claim_pending(&self) -> QueueResult<Option<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let Some(stale) = pending.ids.into_iter().next() else {
            return Ok(None);
        };

        let claimed: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(min_idle_ms)
            .arg(&stale.id)
            .query_async(&mut conn)
            .await?;

        for entry in claimed.ids {
            if let Some(delivery) = self.to_delivery(entry).await? {
                info!(
                    job_id = %delivery.task.job_id,
                    attempt = delivery.attempt,
                    "Claimed pending task"
                );
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }

    async fn to_delivery(&self, entry: redis::streams::StreamId) -> QueueResult<Option<Delivery>> {
        let message_id = entry.id.clone();

        let Some(redis::Value::BulkString(payload)) = entry.map.get("task") else {
            warn!("Stream entry {} has no task payload", message_id);
            self.ack_message(&message_id).await.ok();
            return Ok(None);
        };

        match serde_json::from_slice::<DetectTask>(payload) {
            Ok(task) => {
                let attempt = self.retry_count(&message_id).await? + 1;
                debug!(job_id = %task.job_id, message_id = %message_id, "Consumed task");
                Ok(Some(Delivery {
                    message_id,
                    task,
                    attempt,
                }))
            }
            Err(e) => {
                warn!("Failed to parse task payload: {}", e);
                // Ack the malformed message to prevent reprocessing
                self.ack_message(&message_id).await.ok();
                Ok(None)
            }
        }
    }

    async fn ack_message(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(self.retry_key(message_id)).await?;
        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    fn retry_key(&self, message_id: &str) -> String {
        format!("{}:retry:{}", self.config.stream_name, message_id)
    }

    async fn retry_count(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.connection().await?;
        let count: Option<u32> = conn.get(self.retry_key(message_id)).await?;
        Ok(count.unwrap_or(0))
    }

    async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.connection().await?;
        let key = self.retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    /// Move a task to the dead letter stream.
    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&delivery.task)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("task")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack_message(&delivery.message_id).await?;
        warn!(job_id = %delivery.task.job_id, "Moved task to DLQ: {}", error);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }
}

#[async_trait]
impl TaskDispatcher for RedisQueue {
    async fn enqueue(&self, task: DetectTask) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&task)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("task")
            .arg(&payload)
            .arg("job_id")
            .arg(task.job_id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(job_id = %task.job_id, message_id = %message_id, "Enqueued task");
        Ok(message_id)
    }
}

#[async_trait]
impl TaskSource for RedisQueue {
    async fn next(&self) -> QueueResult<Option<Delivery>> {
        let claim_due = {
            let mut last_claim = self.last_claim.lock().await;
            if last_claim.elapsed() >= self.config.claim_interval {
                *last_claim = Instant::now();
                true
            } else {
                false
            }
        };

        if claim_due {
            if let Some(delivery) = self.claim_pending().await? {
                return Ok(Some(delivery));
            }
        }
        self.read_new().await
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.ack_message(&delivery.message_id).await
    }

    async fn retry_or_dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<RetryDecision> {
        let failures = self.increment_retry(&delivery.message_id).await?;
        if failures >= self.config.max_retries {
            self.dead_letter(delivery, error).await?;
            return Ok(RetryDecision::DeadLettered);
        }

        // Left pending; claimed again after the visibility timeout.
        info!(
            job_id = %delivery.task.job_id,
            "Task will be retried (attempt {}/{})", failures + 1, self.config.max_retries
        );
        Ok(RetryDecision::Redeliver { attempt: failures + 1 })
    }
}
