//! Task execution.
//!
//! The `TaskExecutor` runs one task instance of a run:
//! - Moves the instance from PENDING to RUNNING in the run document
//! - Calls the query service, isolating panics and enforcing an optional timeout
//! - Writes the instance log, then records SUCCESS or FAILED

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::query::{QueryError, QueryService};
use crate::core::dag::Dag;
use crate::core::types::{DagId, RunId, TaskId};
use crate::state::{RunStore, RunStoreError, StateError, TaskStatus};

/// Errors that prevent the executor from recording an outcome.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The task is not part of the run's DAG.
    #[error("task '{0}' is not defined in this dag")]
    UnknownTask(TaskId),

    /// The run store failed.
    #[error(transparent)]
    Store(#[from] RunStoreError),
}

/// The DAG and run a task instance belongs to.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub dag: Arc<Dag>,
    pub run_id: RunId,
}

impl RunContext {
    /// Create a context for one run of `dag`.
    pub fn new(dag: Arc<Dag>, run_id: RunId) -> Self {
        Self { dag, run_id }
    }

    /// Id of the DAG being run.
    pub fn dag_id(&self) -> &DagId {
        self.dag.id()
    }
}

/// What happened to a task instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The query ran and the instance is SUCCESS.
    Succeeded { rows: u64 },
    /// The query failed or faulted and the instance is FAILED.
    Failed { error: String },
    /// The run finished before the outcome could be recorded.
    Abandoned,
}

impl TaskOutcome {
    /// Whether the instance ended in SUCCESS.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }
}

/// Runs single task instances against a query service.
#[derive(Clone)]
pub struct TaskExecutor {
    run_store: RunStore,
    query_service: Arc<dyn QueryService>,
    timeout: Option<Duration>,
}

impl TaskExecutor {
    /// Create an executor without a task timeout.
    pub fn new(run_store: RunStore, query_service: Arc<dyn QueryService>) -> Self {
        Self {
            run_store,
            query_service,
            timeout: None,
        }
    }

    /// Fail tasks whose query runs longer than `duration`.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Get the configured task timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Get the run store this executor writes to.
    pub fn run_store(&self) -> &RunStore {
        &self.run_store
    }

    /// Execute one PENDING task instance to completion.
    ///
    /// The log text is always written before the terminal status, so a reader
    /// that sees SUCCESS or FAILED can also read the log.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        task_id: &TaskId,
    ) -> Result<TaskOutcome, ExecutorError> {
        let task = ctx
            .dag
            .get_task(task_id)
            .ok_or_else(|| ExecutorError::UnknownTask(task_id.clone()))?;

        let started = self
            .run_store
            .update(ctx.dag_id(), &ctx.run_id, |state| {
                state.transition(task_id, TaskStatus::Running)?;
                Ok(state
                    .instance(task_id)
                    .map(|ti| ti.log_file_path.clone())
                    .unwrap_or_default())
            })
            .await;

        let log_path = match started {
            Ok(path) => path,
            Err(RunStoreError::State(StateError::RunFinished(_))) => {
                info!(task = %task_id, "Run already finished, task not started");
                return Ok(TaskOutcome::Abandoned);
            }
            Err(e) => return Err(e.into()),
        };

        debug!(task = %task_id, "Task running");
        let start = Instant::now();
        let result = self.call_service(task.query().to_string()).await;
        let elapsed = start.elapsed();

        let (status, log_text, outcome) = match result {
            Ok(rows) => {
                info!(task = %task_id, rows, elapsed_ms = elapsed.as_millis() as u64, "Task succeeded");
                (
                    TaskStatus::Success,
                    format!(
                        "Task {} completed successfully.\nRows affected/processed: {}",
                        task_id, rows
                    ),
                    TaskOutcome::Succeeded { rows },
                )
            }
            Err(QueryError::Failed(error)) => {
                warn!(task = %task_id, error = %error, "Task failed");
                (
                    TaskStatus::Failed,
                    format!("Task {} failed.\nError: {}", task_id, error),
                    TaskOutcome::Failed { error },
                )
            }
            Err(QueryError::Fault(error)) => {
                warn!(task = %task_id, error = %error, "Task faulted");
                (
                    TaskStatus::Failed,
                    format!(
                        "Task {} failed with unhandled exception: {}",
                        task_id, error
                    ),
                    TaskOutcome::Failed { error },
                )
            }
        };

        self.run_store.append_log(&log_path, &log_text).await?;

        let finished = self
            .run_store
            .update(ctx.dag_id(), &ctx.run_id, |state| {
                state.transition(task_id, status)
            })
            .await;

        match finished {
            Ok(()) => Ok(outcome),
            Err(RunStoreError::State(StateError::RunFinished(_))) => {
                info!(task = %task_id, "Run finished while task was running, outcome not recorded");
                Ok(TaskOutcome::Abandoned)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn call_service(&self, query: String) -> Result<u64, QueryError> {
        let service = Arc::clone(&self.query_service);
        let handle = tokio::spawn(async move { service.execute(&query).await });
        let abort = handle.abort_handle();

        let joined = match self.timeout {
            Some(duration) => match timeout(duration, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(QueryError::Failed(format!(
                        "query timed out after {:?}",
                        duration
                    )));
                }
            },
            None => handle.await,
        };

        joined.map_err(|e| {
            if e.is_panic() {
                QueryError::Fault(panic_message(e.into_panic()))
            } else {
                QueryError::Fault(e.to_string())
            }
        })?
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "query service panicked".to_string()
    }
}
