//! Detection task queue.
//!
//! This crate provides:
//! - `DetectTask`, the message handed from intake to a worker
//! - `TaskDispatcher` / `TaskSource` seams with at-least-once delivery
//! - An in-process queue and a Redis Streams queue with retry/DLQ

pub mod dispatch;
pub mod error;
pub mod memory;
pub mod redis_queue;
pub mod task;

pub use dispatch::{RetryDecision, TaskDispatcher, TaskSource};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use redis_queue::{QueueConfig, RedisQueue};
pub use task::{Delivery, DetectTask};
