use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Object '{0}' not found")]
    NotFound(String),
    #[error("Blob store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Narrow contract over the object store holding the ledger file.
///
/// The hosted store is an external collaborator; everything here reads and
/// writes whole objects. `get` of a missing key must surface
/// [`BlobError::NotFound`] so callers can distinguish "no ledger yet" from a
/// real failure.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError>;
}

/// Directory-backed store. Each key maps to one file under the root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write to a sibling temp file then rename, so readers never observe
        // a partially written table.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Arc<Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.objects
            .lock()
            .await
            .get(key)
            .map(|b| b.as_ref().clone())
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        self.objects
            .lock()
            .await
            .insert(key.to_string(), Arc::new(bytes.to_vec()));
        Ok(())
    }
}
