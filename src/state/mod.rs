//! Run state: the durable record of one execution of a DAG.
//!
//! A [`RunState`] is persisted as a single JSON document and re-read by the
//! monitor loop on every cycle, so a reader in another process sees the same
//! progress the engine does. All status changes go through
//! [`RunState::transition`], which enforces the task lifecycle
//! `QUEUED -> PENDING -> RUNNING -> SUCCESS | FAILED`.

mod store;

pub use store::{RunStore, RunStoreError, StoreLayout};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::dag::Dag;
use crate::core::types::{DagId, RunId, TaskId};

/// Errors raised when mutating a run document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The document has no instance for this task.
    #[error("task '{0}' is not part of this run")]
    UnknownTask(TaskId),

    /// The requested status change is not part of the task lifecycle.
    #[error("invalid transition for task '{task}': {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The run already reached a terminal status and is read-only.
    #[error("run {0} is finished")]
    RunFinished(RunId),
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run is being driven by its monitor.
    Running,
    /// Every task succeeded.
    Success,
    /// At least one task failed.
    Failed,
}

impl RunStatus {
    /// Whether no further changes can happen.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Upper-case label used in documents and output.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Status of a task instance within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for dependencies.
    Queued,
    /// Submitted to the worker pool, not started yet.
    Pending,
    /// Executing.
    Running,
    /// Completed successfully.
    Success,
    /// Failed.
    Failed,
}

impl TaskStatus {
    /// Whether no further changes can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// Whether `next` is the legal successor of this status.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::Pending)
                | (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Success)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }

    /// Upper-case label used in documents and output.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Per-run record of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Dependencies frozen when the run was created.
    pub depends_on: Vec<TaskId>,
    /// Store path of this instance's log text.
    pub log_file_path: String,
}

/// Snapshot of one execution of a DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub dag_id: DagId,
    pub run_id: RunId,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub task_instances: Vec<TaskInstance>,
}

/// Compact view of a run for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl RunState {
    /// Create the initial document for a run: RUNNING, every task QUEUED.
    pub fn new(dag: &Dag, run_id: RunId, layout: &StoreLayout) -> Self {
        let task_instances = dag
            .tasks()
            .iter()
            .map(|task| TaskInstance {
                task_id: task.id().clone(),
                status: TaskStatus::Queued,
                start_time: None,
                end_time: None,
                depends_on: task.dependencies().to_vec(),
                log_file_path: layout.log_path(dag.id(), &run_id, task.id()),
            })
            .collect();

        Self {
            dag_id: dag.id().clone(),
            run_id,
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            task_instances,
        }
    }

    /// Get a task instance.
    pub fn instance(&self, task_id: &TaskId) -> Option<&TaskInstance> {
        self.task_instances.iter().find(|ti| &ti.task_id == task_id)
    }

    fn instance_mut(&mut self, task_id: &TaskId) -> Result<&mut TaskInstance, StateError> {
        self.task_instances
            .iter_mut()
            .find(|ti| &ti.task_id == task_id)
            .ok_or_else(|| StateError::UnknownTask(task_id.clone()))
    }

    /// Move a task instance to `next`.
    ///
    /// Entering RUNNING stamps `start_time`; entering a terminal status stamps
    /// `end_time`. Fails on a finished run or an illegal transition.
    pub fn transition(&mut self, task_id: &TaskId, next: TaskStatus) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::RunFinished(self.run_id.clone()));
        }

        let instance = self.instance_mut(task_id)?;
        if !instance.status.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                task: task_id.clone(),
                from: instance.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            TaskStatus::Running => instance.start_time = Some(now),
            TaskStatus::Success | TaskStatus::Failed => instance.end_time = Some(now),
            TaskStatus::Queued | TaskStatus::Pending => {}
        }
        instance.status = next;
        Ok(())
    }

    /// Close the run with a terminal status and stamp `end_time`.
    pub fn finish(&mut self, status: RunStatus) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::RunFinished(self.run_id.clone()));
        }
        self.status = status;
        self.end_time = Some(Utc::now());
        Ok(())
    }

    /// First FAILED instance in document order.
    pub fn first_failed(&self) -> Option<&TaskInstance> {
        self.task_instances
            .iter()
            .find(|ti| ti.status == TaskStatus::Failed)
    }

    /// Whether every instance reached SUCCESS.
    pub fn all_succeeded(&self) -> bool {
        self.task_instances
            .iter()
            .all(|ti| ti.status == TaskStatus::Success)
    }

    /// Whether every dependency of `instance` is SUCCESS in this snapshot.
    pub fn dependencies_met(&self, instance: &TaskInstance) -> bool {
        instance.depends_on.iter().all(|dep| {
            self.instance(dep)
                .is_some_and(|upstream| upstream.status == TaskStatus::Success)
        })
    }

    /// QUEUED instances whose dependencies all succeeded, in document order.
    pub fn ready_queued(&self) -> Vec<TaskId> {
        self.task_instances
            .iter()
            .filter(|ti| ti.status == TaskStatus::Queued && self.dependencies_met(ti))
            .map(|ti| ti.task_id.clone())
            .collect()
    }

    /// Number of instances in `status`.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.task_instances
            .iter()
            .filter(|ti| ti.status == status)
            .count()
    }

    /// Listing view of this run.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}
