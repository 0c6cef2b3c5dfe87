//! Dispatch seams.

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::task::{Delivery, DetectTask};

/// What happened to a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Will be delivered again
    Redeliver { attempt: u32 },
    /// Retry budget exhausted, moved to the dead-letter queue
    DeadLettered,
}

/// Producer side: fire-and-forget, at-least-once.
///
/// Duplicate tasks for the same job are not filtered here; the worker
/// tolerates them.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Enqueue a task, returning the transport message id.
    async fn enqueue(&self, task: DetectTask) -> QueueResult<String>;
}

/// Consumer side.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Wait briefly for the next delivery. `None` means nothing arrived in time.
    async fn next(&self) -> QueueResult<Option<Delivery>>;

    /// Mark a delivery as handled.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Schedule a failed delivery for another attempt, or dead-letter it.
    async fn retry_or_dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<RetryDecision>;
}
