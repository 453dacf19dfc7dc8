//! Testing utilities for users of the dagrun library.
//!
//! This module provides test doubles for the engine's two external seams:
//!
//! - [`ScriptedQueryService`]: a query service with per-query scripted
//!   results, delays and panics that also records concurrency
//! - [`FailingBlobStore`]: a blob store wrapper that can be switched into an
//!   outage, immediately or after a number of writes

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::execution::{QueryError, QueryService};
use crate::storage::{Blob, BlobStore, InMemoryBlobStore, StorageError, Version};

/// Scripted response for one query.
#[derive(Debug, Clone)]
enum Script {
    Rows(u64),
    Fail(String),
    Panic(String),
}

/// A query service that answers from a script.
///
/// Unscripted queries succeed with zero rows unless a different default is
/// set.
///
/// # Example
///
/// ```
/// use dagrun::testing::ScriptedQueryService;
/// use std::time::Duration;
///
/// let service = ScriptedQueryService::new()
///     .succeed("SELECT * FROM orders", 5)
///     .fail("DROP TABLE audit", "permission denied")
///     .delay("SELECT * FROM orders", Duration::from_millis(10));
///
/// assert_eq!(service.call_count(), 0);
/// ```
#[derive(Debug)]
pub struct ScriptedQueryService {
    scripts: HashMap<String, Script>,
    delays: HashMap<String, Duration>,
    default_script: Script,
    default_delay: Option<Duration>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl Default for ScriptedQueryService {
    fn default() -> Self {
        Self {
            scripts: HashMap::new(),
            delays: HashMap::new(),
            default_script: Script::Rows(0),
            default_delay: None,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedQueryService {
    /// Create a service where every query succeeds with zero rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `query` succeed with `rows`.
    pub fn succeed(mut self, query: impl Into<String>, rows: u64) -> Self {
        self.scripts.insert(query.into(), Script::Rows(rows));
        self
    }

    /// Make `query` fail with `message`.
    pub fn fail(mut self, query: impl Into<String>, message: impl Into<String>) -> Self {
        self.scripts
            .insert(query.into(), Script::Fail(message.into()));
        self
    }

    /// Make `query` panic with `message`.
    pub fn panic(mut self, query: impl Into<String>, message: impl Into<String>) -> Self {
        self.scripts
            .insert(query.into(), Script::Panic(message.into()));
        self
    }

    /// Delay the answer to `query`.
    pub fn delay(mut self, query: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(query.into(), delay);
        self
    }

    /// Rows returned for unscripted queries.
    pub fn default_rows(mut self, rows: u64) -> Self {
        self.default_script = Script::Rows(rows);
        self
    }

    /// Delay applied to queries without their own delay.
    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// Queries received so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Whether `query` was called at least once.
    pub fn was_called(&self, query: &str) -> bool {
        self.calls
            .lock()
            .map(|c| c.iter().any(|q| q == query))
            .unwrap_or(false)
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

/// Decrements the in-progress counter even if the call panics.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueryService for ScriptedQueryService {
    async fn execute(&self, query: &str) -> Result<u64, QueryError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(query.to_string());
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = RunningGuard(&self.running);
        self.max_running.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(query).copied().or(self.default_delay) {
            tokio::time::sleep(delay).await;
        }

        match self.scripts.get(query).unwrap_or(&self.default_script) {
            Script::Rows(rows) => Ok(*rows),
            Script::Fail(message) => Err(QueryError::Failed(message.clone())),
            Script::Panic(message) => panic!("{}", message),
        }
    }
}

/// A blob store that can be made to fail.
///
/// Wraps another store and forwards every call until an outage starts. An
/// outage starts when [`set_unavailable`](Self::set_unavailable) is called or
/// when the write budget set by [`fail_after_writes`](Self::fail_after_writes)
/// is spent. During an outage every operation fails with
/// [`StorageError::Unavailable`].
pub struct FailingBlobStore {
    inner: Arc<dyn BlobStore>,
    unavailable: AtomicBool,
    write_budget: Mutex<Option<usize>>,
}

impl FailingBlobStore {
    /// Wrap an existing store.
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            unavailable: AtomicBool::new(false),
            write_budget: Mutex::new(None),
        }
    }

    /// Wrap a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBlobStore::new()))
    }

    /// Start or end an outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Allow `writes` more successful writes, then start an outage.
    pub fn fail_after_writes(self, writes: usize) -> Self {
        if let Ok(mut budget) = self.write_budget.lock() {
            *budget = Some(writes);
        }
        self
    }

    /// Whether the store is currently failing.
    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.is_unavailable() {
            return Err(StorageError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    fn spend_write(&self) -> Result<(), StorageError> {
        self.check()?;
        let mut budget = self
            .write_budget
            .lock()
            .map_err(|_| StorageError::Unavailable("write budget lock poisoned".to_string()))?;
        match budget.as_mut() {
            Some(0) => {
                self.set_unavailable(true);
                Err(StorageError::Unavailable("simulated outage".to_string()))
            }
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn get(&self, path: &str) -> Result<Blob, StorageError> {
        self.check()?;
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, data: Vec<u8>) -> Result<Version, StorageError> {
        self.spend_write()?;
        self.inner.put(path, data).await
    }

    async fn put_if(
        &self,
        path: &str,
        data: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StorageError> {
        self.spend_write()?;
        self.inner.put_if(path, data, expected).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.check()?;
        self.inner.list(prefix).await
    }
}
