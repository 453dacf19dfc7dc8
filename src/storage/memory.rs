//! In-memory blob store.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{Blob, BlobStore, StorageError, Version};

/// In-memory blob store.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Blob>>,
}

impl InMemoryBlobStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StorageError {
    StorageError::Unavailable("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, path: &str) -> Result<Blob, StorageError> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        blobs
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn put(&self, path: &str, data: Vec<u8>) -> Result<Version, StorageError> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        let version = blobs
            .get(path)
            .map(|blob| blob.version.next())
            .unwrap_or(Version::FIRST);
        blobs.insert(path.to_string(), Blob { data, version });
        Ok(version)
    }

    async fn put_if(
        &self,
        path: &str,
        data: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StorageError> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        let current = blobs.get(path).map(|blob| blob.version);
        if current != expected {
            return Err(StorageError::PreconditionFailed {
                path: path.to_string(),
            });
        }
        let version = current.map(|v| v.next()).unwrap_or(Version::FIRST);
        blobs.insert(path.to_string(), Blob { data, version });
        Ok(version)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect())
    }
}
