//! The per-run monitor loop.
//!
//! A [`RunMonitor`] owns one run from creation to a terminal status. Each
//! cycle it re-reads the run document, finishes the run if a task failed or
//! every task succeeded, and otherwise dispatches ready tasks to a bounded
//! worker pool. Progress is observed only through the run document; the only
//! thing a worker hands back is a store error, which stops the loop.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::types::{MonitorConfig, SchedulerError};
use crate::core::types::TaskId;
use crate::execution::{ExecutorError, RunContext, TaskExecutor, TaskOutcome};
use crate::state::{RunStatus, RunStore, RunStoreError, StateError, TaskStatus};

/// Drives one run to completion.
pub struct RunMonitor {
    ctx: RunContext,
    executor: TaskExecutor,
    config: MonitorConfig,
}

impl RunMonitor {
    /// Create a monitor for the run described by `ctx`.
    pub fn new(ctx: RunContext, executor: TaskExecutor, config: MonitorConfig) -> Self {
        Self {
            ctx,
            executor,
            config,
        }
    }

    fn store(&self) -> &RunStore {
        self.executor.run_store()
    }

    /// Run the loop until the run reaches a terminal status.
    ///
    /// Returns the terminal status. A store error, whether hit by the loop
    /// itself or by one of its tasks, aborts the loop and is returned; the run
    /// document keeps its last persisted status. Dispatched tasks are always
    /// drained before this returns.
    pub async fn run(self) -> Result<RunStatus, SchedulerError> {
        let span = info_span!(
            "run_monitor",
            dag = %self.ctx.dag_id(),
            run = %self.ctx.run_id,
        );
        self.supervise().instrument(span).await
    }

    async fn supervise(&self) -> Result<RunStatus, SchedulerError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tasks.max(1)));
        let mut pool = JoinSet::new();

        let result = self.poll_loop(&semaphore, &mut pool).await;

        if !pool.is_empty() {
            debug!(in_flight = pool.len(), "Draining worker pool");
        }
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Task outcome could not be recorded"),
                Err(e) => error!(error = %e, "Worker task aborted"),
            }
        }

        match &result {
            Ok(status) => info!(status = %status, "Run finished"),
            Err(e) => error!(error = %e, "Monitor stopped, run left in its last persisted state"),
        }
        result
    }

    async fn poll_loop(
        &self,
        semaphore: &Arc<Semaphore>,
        pool: &mut JoinSet<Result<(), ExecutorError>>,
    ) -> Result<RunStatus, SchedulerError> {
        let dag_id = self.ctx.dag_id();
        let run_id = &self.ctx.run_id;
        let mut dispatched: HashSet<TaskId> = HashSet::new();

        loop {
            while let Some(joined) = pool.try_join_next() {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(self.task_error(e)),
                    Err(e) => error!(error = %e, "Worker task aborted"),
                }
            }

            let state = self
                .store()
                .load(dag_id, run_id)
                .await?
                .ok_or_else(|| SchedulerError::RunNotFound(run_id.clone()))?;

            if state.status.is_terminal() {
                return Ok(state.status);
            }

            if let Some(failed) = state.first_failed() {
                warn!(task = %failed.task_id, "Task failed, failing run");
                return self.finish(RunStatus::Failed).await;
            }

            if state.all_succeeded() {
                return self.finish(RunStatus::Success).await;
            }

            for task_id in state.ready_queued() {
                if dispatched.contains(&task_id) {
                    continue;
                }
                self.store()
                    .update(dag_id, run_id, |s| s.transition(&task_id, TaskStatus::Pending))
                    .await?;
                dispatched.insert(task_id.clone());
                self.spawn_task(pool, semaphore, task_id);
            }

            debug!(
                running = state.count(TaskStatus::Running),
                pending = state.count(TaskStatus::Pending),
                queued = state.count(TaskStatus::Queued),
                "Waiting for progress"
            );
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn spawn_task(
        &self,
        pool: &mut JoinSet<Result<(), ExecutorError>>,
        semaphore: &Arc<Semaphore>,
        task_id: TaskId,
    ) {
        let executor = self.executor.clone();
        let ctx = self.ctx.clone();
        let semaphore = Arc::clone(semaphore);

        let task_span = info_span!(
            "task",
            dag = %ctx.dag_id(),
            run = %ctx.run_id,
            task = %task_id,
        );

        debug!(task = %task_id, "Dispatching task");
        pool.spawn(
            async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Ok::<(), ExecutorError>(());
                };
                match executor.execute(&ctx, &task_id).await? {
                    TaskOutcome::Abandoned => debug!("Task abandoned"),
                    outcome => debug!(success = outcome.is_success(), "Task done"),
                }
                Ok(())
            }
            .instrument(task_span),
        );
    }

    fn task_error(&self, error: ExecutorError) -> SchedulerError {
        match error {
            ExecutorError::Store(e) => SchedulerError::Storage(e),
            ExecutorError::UnknownTask(task_id) => SchedulerError::TaskNotFound {
                run_id: self.ctx.run_id.clone(),
                task_id,
            },
        }
    }

    async fn finish(&self, status: RunStatus) -> Result<RunStatus, SchedulerError> {
        let dag_id = self.ctx.dag_id();
        let run_id = &self.ctx.run_id;

        match self
            .store()
            .update(dag_id, run_id, |s| s.finish(status))
            .await
        {
            Ok(()) => Ok(status),
            Err(RunStoreError::State(StateError::RunFinished(_))) => {
                let state = self
                    .store()
                    .load(dag_id, run_id)
                    .await?
                    .ok_or_else(|| SchedulerError::RunNotFound(run_id.clone()))?;
                Ok(state.status)
            }
            Err(e) => Err(e.into()),
        }
    }
}
