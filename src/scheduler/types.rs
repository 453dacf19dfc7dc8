//! Scheduler type definitions.
//!
//! This module contains the error type and monitor settings shared by the
//! monitor loop and the launcher.

use std::time::Duration;

use crate::core::types::{DagId, RunId, TaskId};
use crate::state::RunStoreError;
use thiserror::Error;

/// Errors that can occur while launching or supervising runs.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The DAG is not in the catalog.
    #[error("dag not found: {0}")]
    DagNotFound(DagId),

    /// No run document exists for this run.
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    /// The run has no instance for this task.
    #[error("task '{task_id}' not found in run {run_id}")]
    TaskNotFound { run_id: RunId, task_id: TaskId },

    /// The task has not written a log yet.
    #[error("no log for task '{task_id}' in run {run_id}")]
    LogNotFound { run_id: RunId, task_id: TaskId },

    /// Run store error.
    #[error("storage error: {0}")]
    Storage(#[from] RunStoreError),

    /// A monitor task panicked or was cancelled.
    #[error("monitor task failed: {0}")]
    Join(String),
}

/// Settings for one run's monitor loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Time between polls of the run document.
    pub poll_interval: Duration,
    /// Size of the per-run worker pool.
    pub max_parallel_tasks: usize,
}

impl MonitorConfig {
    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the worker pool size. Zero is treated as one.
    pub fn with_max_parallel_tasks(mut self, max: usize) -> Self {
        self.max_parallel_tasks = max.max(1);
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_parallel_tasks: 4,
        }
    }
}
