use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::domain::error::{AppError, Result};

/// Opaque key/value byte storage for dataset sources and reports.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fails with [`AppError::NotFound`] when no blob is stored under `key`.
    async fn open(&self, key: &str) -> Result<Vec<u8>>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

fn storage_err(msg: impl Into<String>) -> AppError {
    AppError::Storage(msg.into())
}

/// Reject keys that could escape the storage root
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('\\') {
        return Err(AppError::ValidationError(format!("Invalid blob key: {:?}", key)));
    }

    let all_normal = Path::new(key)
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if !all_normal {
        return Err(AppError::ValidationError(format!("Invalid blob key: {:?}", key)));
    }

    Ok(())
}

/// Blobs stored as files under a media root directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub async fn open_root(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            storage_err(format!("Failed to create media root {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                storage_err(format!("Failed to create dir {}: {e}", parent.display()))
            })?;
        }

        // Write to a sibling temp file, then rename into place
        let tmp_path = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        let write_result = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(storage_err(format!(
                "Failed to write blob {}: {e}",
                path.display()
            )));
        }

        Ok(())
    }

    async fn open(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Blob not found: {}", key)))
            }
            Err(e) => Err(storage_err(format!("Failed to read blob {}: {e}", path.display()))),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_err(format!(
                "Failed to delete blob {}: {e}",
                path.display()
            ))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| storage_err(format!("Failed to stat blob {}: {e}", path.display())))
    }
}

/// Process-local blob storage, used for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    faults: Mutex<FaultPlan>,
}

/// Key prefixes whose writes or deletes should fail
#[derive(Debug, Default)]
struct FaultPlan {
    failing_saves: Vec<String>,
    failing_deletes: Vec<String>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .blobs
            .lock()
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    #[cfg(test)]
    pub fn fail_saves_with_prefix(&self, prefix: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_saves.push(prefix.to_string());
        }
    }

    #[cfg(test)]
    pub fn fail_deletes_with_prefix(&self, prefix: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_deletes.push(prefix.to_string());
        }
    }

    #[cfg(test)]
    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = FaultPlan::default();
        }
    }

    fn should_fail(&self, key: &str, deletes: bool) -> bool {
        let Ok(faults) = self.faults.lock() else {
            return false;
        };
        let prefixes = if deletes {
            &faults.failing_deletes
        } else {
            &faults.failing_saves
        };
        prefixes.iter().any(|prefix| key.starts_with(prefix.as_str()))
    }

    fn blobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.blobs
            .lock()
            .map_err(|_| storage_err("In-memory blob store lock poisoned"))
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        if self.should_fail(key, false) {
            return Err(storage_err(format!("Failed to write blob {}", key)));
        }
        self.blobs()?.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn open(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        self.blobs()?
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Blob not found: {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        if self.should_fail(key, true) {
            return Err(storage_err(format!("Failed to delete blob {}", key)));
        }
        Ok(self.blobs()?.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.blobs()?.contains_key(key))
    }
}
