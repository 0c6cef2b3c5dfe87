//! In-process task queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::dispatch::{RetryDecision, TaskDispatcher, TaskSource};
use crate::error::{QueueError, QueueResult};
use crate::task::{Delivery, DetectTask};

/// Queue backed by a tokio channel, for single-process deployments and tests.
///
/// Failed deliveries are re-sent immediately until `max_retries` attempts
/// have been made, then kept in a local dead-letter list.
pub struct MemoryQueue {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    dead_letters: Mutex<Vec<(Delivery, String)>>,
    sequence: AtomicU64,
    max_retries: u32,
    poll_interval: Duration,
}

impl MemoryQueue {
    pub fn new(max_retries: u32) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            dead_letters: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            max_retries,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Deliveries that exhausted their retries, with the last error.
    pub async fn dead_letters(&self) -> Vec<(Delivery, String)> {
        self.dead_letters.lock().await.clone()
    }

    fn send(&self, delivery: Delivery) -> QueueResult<()> {
        self.sender.send(delivery).map_err(|_| QueueError::Closed)
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl TaskDispatcher for MemoryQueue {
    async fn enqueue(&self, task: DetectTask) -> QueueResult<String> {
        let message_id = format!("mem-{}", self.sequence.fetch_add(1, Ordering::Relaxed) + 1);
        info!(job_id = %task.job_id, message_id = %message_id, "Enqueued task");
        self.send(Delivery {
            message_id: message_id.clone(),
            task,
            attempt: 1,
        })?;
        Ok(message_id)
    }
}

#[async_trait]
impl TaskSource for MemoryQueue {
    async fn next(&self) -> QueueResult<Option<Delivery>> {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(self.poll_interval, receiver.recv()).await {
            Ok(Some(delivery)) => Ok(Some(delivery)),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        debug!(message_id = %delivery.message_id, "Acknowledged task");
        Ok(())
    }

    async fn retry_or_dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<RetryDecision> {
        if delivery.attempt >= self.max_retries {
            warn!(
                job_id = %delivery.task.job_id,
                attempts = delivery.attempt,
                "Task exceeded max retries, moving to dead letters: {}", error
            );
            self.dead_letters
                .lock()
                .await
                .push((delivery.clone(), error.to_string()));
            return Ok(RetryDecision::DeadLettered);
        }

        let attempt = delivery.attempt + 1;
        self.send(Delivery {
            attempt,
            ..delivery.clone()
        })?;
        info!(job_id = %delivery.task.job_id, attempt, "Task will be retried");
        Ok(RetryDecision::Redeliver { attempt })
    }
}
