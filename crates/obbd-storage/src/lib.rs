//! Artifact storage for detection jobs.
//!
//! This crate provides:
//! - The `ArtifactStore` seam with local-filesystem and in-memory stores
//! - Tab-separated label files rendered from detections
//! - Label download name resolution

pub mod error;
pub mod labels;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use labels::{label_artifact, label_path, render_labels, resolve_label_download, LabelArtifact, LABELS_DIR};
pub use store::{ArtifactStore, LocalArtifactStore, MemoryArtifactStore};
