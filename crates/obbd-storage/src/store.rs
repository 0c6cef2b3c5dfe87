//! Artifact stores.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use obbd_models::ArtifactRef;

use crate::error::{StorageError, StorageResult};

/// Durable storage for job artifacts.
///
/// Keys are relative, `/`-separated paths such as `labels/<job_id>.txt`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` under `relative_path`, replacing any previous content.
    async fn write(&self, relative_path: &str, bytes: Vec<u8>) -> StorageResult<ArtifactRef>;

    /// Load a stored artifact.
    async fn read(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>>;
}

/// Reject absolute keys and anything that could leave the store root.
fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.contains('\\') {
        return Err(StorageError::invalid_key(key));
    }

    let path = Path::new(key);
    let all_normal = path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal || key.ends_with('/') {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

async fn discard_partial(tmp: &Path) {
    if let Err(e) = tokio::fs::remove_file(tmp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %tmp.display(), "Failed to remove partial artifact: {}", e);
        }
    }
}

/// Artifact store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a key.
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn write(&self, relative_path: &str, bytes: Vec<u8>) -> StorageResult<ArtifactRef> {
        let path = self.path_for(relative_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write beside the target and rename so readers never see a partial file.
        let tmp = path.with_extension("part");
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            discard_partial(&tmp).await;
            return Err(StorageError::write_failed(format!("{}: {}", tmp.display(), e)));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            discard_partial(&tmp).await;
            return Err(e.into());
        }

        info!("Stored artifact {} ({} bytes)", relative_path, bytes.len());
        Ok(ArtifactRef::new(relative_path))
    }

    async fn read(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>> {
        let path = self.path_for(artifact.as_str())?;
        debug!("Reading artifact {}", path.display());

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(artifact.as_str()))
            }
            Err(e) => Err(StorageError::ReadFailed(format!("{}: {}", path.display(), e))),
        }
    }
}

/// In-process artifact store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn write(&self, relative_path: &str, bytes: Vec<u8>) -> StorageResult<ArtifactRef> {
        validate_key(relative_path)?;
        self.objects
            .write()
            .await
            .insert(relative_path.to_string(), bytes);
        Ok(ArtifactRef::new(relative_path))
    }

    async fn read(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(artifact.as_str())
            .cloned()
            .ok_or_else(|| StorageError::not_found(artifact.as_str()))
    }
}
