//! Persistence of run documents and task logs on a [`BlobStore`].
//!
//! Layout:
//!
//! ```text
//! {prefix}/{dag_id}/{run_id}/metadata.json
//! {prefix}/{dag_id}/{run_id}/logs/{task_id}.log
//! ```
//!
//! Every write to an existing document is a read-modify-write guarded by a
//! conditional put on the version that was read. Concurrent writers that
//! lose the race re-read and re-apply their change.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::{RunState, RunSummary, StateError};
use crate::core::types::{DagId, RunId, TaskId};
use crate::storage::{BlobStore, StorageError, Version};

/// Default number of conditional-put attempts before giving up.
const DEFAULT_MAX_ATTEMPTS: usize = 16;

const METADATA_FILE: &str = "metadata.json";

/// Errors from the run store.
#[derive(Debug, Error)]
pub enum RunStoreError {
    /// The blob store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The requested change was rejected by the run document.
    #[error(transparent)]
    State(#[from] StateError),

    /// Too many concurrent writers; every attempt lost the race.
    #[error("write conflict on '{path}' after {attempts} attempts")]
    Conflict { path: String, attempts: usize },

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RunStoreError {
    /// Whether the error came from the document rejecting a change.
    pub fn is_state(&self) -> bool {
        matches!(self, RunStoreError::State(_))
    }
}

/// Path scheme for run documents and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    prefix: String,
}

impl StoreLayout {
    /// Layout rooted at `prefix` (trailing slashes are ignored).
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Root prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix under which all runs of a DAG live, with trailing slash.
    pub fn dag_prefix(&self, dag_id: &DagId) -> String {
        format!("{}/{}/", self.prefix, dag_id)
    }

    /// Directory of one run.
    pub fn run_dir(&self, dag_id: &DagId, run_id: &RunId) -> String {
        format!("{}/{}/{}", self.prefix, dag_id, run_id)
    }

    /// Path of a run's metadata document.
    pub fn metadata_path(&self, dag_id: &DagId, run_id: &RunId) -> String {
        format!("{}/{}", self.run_dir(dag_id, run_id), METADATA_FILE)
    }

    /// Path of a task's log within a run.
    pub fn log_path(&self, dag_id: &DagId, run_id: &RunId, task_id: &TaskId) -> String {
        format!("{}/logs/{}.log", self.run_dir(dag_id, run_id), task_id)
    }

    /// Extract the run id from a metadata path under `dag_id`.
    fn run_id_from_metadata_path(&self, dag_id: &DagId, path: &str) -> Option<RunId> {
        let rest = path.strip_prefix(&self.dag_prefix(dag_id))?;
        let run = rest.strip_suffix(METADATA_FILE)?.strip_suffix('/')?;
        if run.contains('/') {
            return None;
        }
        RunId::parse(run).ok()
    }
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self::new("dag_runs")
    }
}

/// Typed access to run documents and task logs.
#[derive(Clone)]
pub struct RunStore {
    blobs: Arc<dyn BlobStore>,
    layout: StoreLayout,
    max_attempts: usize,
}

impl RunStore {
    /// Create a run store with the default layout.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self::with_layout(blobs, StoreLayout::default())
    }

    /// Create a run store with a custom layout.
    pub fn with_layout(blobs: Arc<dyn BlobStore>, layout: StoreLayout) -> Self {
        Self {
            blobs,
            layout,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set how many times a conflicting write is retried.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Path scheme in use.
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Persist a new run document. Fails if the run already exists.
    pub async fn create(&self, state: &RunState) -> Result<(), RunStoreError> {
        let path = self.layout.metadata_path(&state.dag_id, &state.run_id);
        let data = serde_json::to_vec_pretty(state)?;
        self.blobs.put_if(&path, data, None).await?;
        debug!(dag_id = %state.dag_id, run_id = %state.run_id, "Created run document");
        Ok(())
    }

    /// Overwrite a run document unconditionally.
    pub async fn save(&self, state: &RunState) -> Result<(), RunStoreError> {
        let path = self.layout.metadata_path(&state.dag_id, &state.run_id);
        let data = serde_json::to_vec_pretty(state)?;
        self.blobs.put(&path, data).await?;
        Ok(())
    }

    /// Load a run document, `None` if it does not exist.
    pub async fn load(
        &self,
        dag_id: &DagId,
        run_id: &RunId,
    ) -> Result<Option<RunState>, RunStoreError> {
        Ok(self
            .load_versioned(dag_id, run_id)
            .await?
            .map(|(state, _)| state))
    }

    /// Load a run document together with the version it was read at.
    pub async fn load_versioned(
        &self,
        dag_id: &DagId,
        run_id: &RunId,
    ) -> Result<Option<(RunState, Version)>, RunStoreError> {
        let path = self.layout.metadata_path(dag_id, run_id);
        match self.blobs.get(&path).await {
            Ok(blob) => {
                let state: RunState = serde_json::from_slice(&blob.data)?;
                Ok(Some((state, blob.version)))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `mutate` to the current run document and write it back.
    ///
    /// `mutate` runs against a fresh read on every attempt and must not have
    /// side effects outside the document. If it returns an error nothing is
    /// written.
    pub async fn update<T, F>(
        &self,
        dag_id: &DagId,
        run_id: &RunId,
        mut mutate: F,
    ) -> Result<T, RunStoreError>
    where
        F: FnMut(&mut RunState) -> Result<T, StateError>,
    {
        let path = self.layout.metadata_path(dag_id, run_id);

        for attempt in 1..=self.max_attempts {
            let blob = self.blobs.get(&path).await?;
            let mut state: RunState = serde_json::from_slice(&blob.data)?;
            let out = mutate(&mut state)?;
            let data = serde_json::to_vec_pretty(&state)?;

            match self.blobs.put_if(&path, data, Some(blob.version)).await {
                Ok(_) => return Ok(out),
                Err(StorageError::PreconditionFailed { .. }) => {
                    debug!(path = %path, attempt, "Run document changed underneath, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(path = %path, attempts = self.max_attempts, "Giving up on contended run document");
        Err(RunStoreError::Conflict {
            path,
            attempts: self.max_attempts,
        })
    }

    /// Append text to a log blob, creating it if needed.
    pub async fn append_log(&self, path: &str, text: &str) -> Result<(), RunStoreError> {
        for _ in 0..self.max_attempts {
            let (mut content, expected) = match self.blobs.get(path).await {
                Ok(blob) => (blob.data, Some(blob.version)),
                Err(e) if e.is_not_found() => (Vec::new(), None),
                Err(e) => return Err(e.into()),
            };

            if !content.is_empty() && !content.ends_with(b"\n") {
                content.push(b'\n');
            }
            content.extend_from_slice(text.as_bytes());

            match self.blobs.put_if(path, content, expected).await {
                Ok(_) => return Ok(()),
                Err(StorageError::PreconditionFailed { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(RunStoreError::Conflict {
            path: path.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Read a log blob, `None` if nothing was written yet.
    pub async fn read_log(&self, path: &str) -> Result<Option<String>, RunStoreError> {
        match self.blobs.get(path).await {
            Ok(blob) => Ok(Some(String::from_utf8_lossy(&blob.data).into_owned())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Run ids of a DAG, most recent first.
    pub async fn list_runs(&self, dag_id: &DagId) -> Result<Vec<RunId>, RunStoreError> {
        let paths = self.blobs.list(&self.layout.dag_prefix(dag_id)).await?;
        let mut runs: Vec<RunId> = paths
            .iter()
            .filter_map(|path| self.layout.run_id_from_metadata_path(dag_id, path))
            .collect();
        runs.sort_by(|a, b| b.cmp(a));
        runs.dedup();
        Ok(runs)
    }

    /// Summaries of a DAG's runs, most recent first.
    pub async fn list_run_summaries(
        &self,
        dag_id: &DagId,
    ) -> Result<Vec<RunSummary>, RunStoreError> {
        let mut summaries = Vec::new();
        for run_id in self.list_runs(dag_id).await? {
            if let Some(state) = self.load(dag_id, &run_id).await? {
                summaries.push(state.summary());
            }
        }
        Ok(summaries)
    }
}
