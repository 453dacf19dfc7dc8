//! Blob storage abstraction for run documents and task logs.
//!
//! The engine persists everything through a byte-oriented [`BlobStore`]:
//! whole documents addressed by slash-separated paths. Backends are
//! pluggable (in-memory, SQLite, ...). Every stored blob carries a
//! [`Version`] so writers can make conditional puts instead of blind
//! overwrites.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryBlobStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBlobStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The requested blob was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional put found a different version than expected.
    #[error("precondition failed for '{path}'")]
    PreconditionFailed { path: String },

    /// The backend could not be reached or rejected the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored bytes could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Whether this error means the blob does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Generation counter of a stored blob.
///
/// Starts at 1 on first write and grows by one on every write to the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version assigned to a freshly created blob.
    pub const FIRST: Version = Version(1);

    /// Wrap a raw generation number.
    pub fn new(generation: u64) -> Self {
        Self(generation)
    }

    /// The raw generation number.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// The version that follows this one.
    pub fn next(&self) -> Version {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A stored blob and its current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub version: Version,
}

/// Byte-oriented durable store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob.
    async fn get(&self, path: &str) -> Result<Blob, StorageError>;

    /// Write a blob unconditionally.
    async fn put(&self, path: &str, data: Vec<u8>) -> Result<Version, StorageError>;

    /// Write a blob only if its current version matches `expected`.
    ///
    /// `None` means the blob must not exist yet. On mismatch the store is left
    /// untouched and [`StorageError::PreconditionFailed`] is returned.
    async fn put_if(
        &self,
        path: &str,
        data: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StorageError>;

    /// List blob paths starting with `prefix`, sorted ascending.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
