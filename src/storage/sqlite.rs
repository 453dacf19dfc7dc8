//! SQLite blob store.
//!
//! Provides a durable single-file backend. Each blob is one row keyed by
//! path; the `version` column backs conditional puts.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{Blob, BlobStore, StorageError, Version};

/// SQLite blob store backend.
///
/// Creates its schema on open.
pub struct SqliteBlobStore {
    pool: SqlitePool,
}

fn unavailable(e: sqlx::Error) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

fn to_version(raw: i64) -> Result<Version, StorageError> {
    u64::try_from(raw)
        .map(Version::new)
        .map_err(|_| StorageError::Serialization(format!("negative blob version: {}", raw)))
}

fn to_raw(version: Version) -> Result<i64, StorageError> {
    i64::try_from(version.get())
        .map_err(|_| StorageError::Serialization(format!("blob version out of range: {}", version)))
}

impl SqliteBlobStore {
    /// Open (or create) the database file at `path`.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(unavailable)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(unavailable)?;

        // a second connection would see a different in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_blobs.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn get(&self, path: &str) -> Result<Blob, StorageError> {
        let row: (Vec<u8>, i64) = sqlx::query_as("SELECT data, version FROM blobs WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;

        Ok(Blob {
            data: row.0,
            version: to_version(row.1)?,
        })
    }

    async fn put(&self, path: &str, data: Vec<u8>) -> Result<Version, StorageError> {
        let (version,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO blobs (path, data, version) VALUES (?, ?, 1)
            ON CONFLICT(path) DO UPDATE SET data = excluded.data, version = blobs.version + 1
            RETURNING version
            "#,
        )
        .bind(path)
        .bind(data)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        to_version(version)
    }

    async fn put_if(
        &self,
        path: &str,
        data: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StorageError> {
        let result = match expected {
            None => sqlx::query(
                "INSERT INTO blobs (path, data, version) VALUES (?, ?, 1) ON CONFLICT(path) DO NOTHING",
            )
            .bind(path)
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?,
            Some(version) => sqlx::query(
                "UPDATE blobs SET data = ?, version = version + 1 WHERE path = ? AND version = ?",
            )
            .bind(data)
            .bind(path)
            .bind(to_raw(version)?)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?,
        };

        if result.rows_affected() == 0 {
            return Err(StorageError::PreconditionFailed {
                path: path.to_string(),
            });
        }

        Ok(expected.map(|v| v.next()).unwrap_or(Version::FIRST))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT path FROM blobs WHERE substr(path, 1, ?) = ? ORDER BY path",
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(rows.into_iter().map(|(path,)| path).collect())
    }
}
