//! Job record storage.
//!
//! This crate provides:
//! - The `JobStore` seam (create, read, locked update, listing)
//! - An in-memory store with one lock per job record

pub mod error;
pub mod memory;
pub mod store;

pub use error::{JobStoreError, JobStoreResult};
pub use memory::InMemoryJobStore;
pub use store::{JobLock, JobStore};
