//! Run launcher and read-only run queries.
//!
//! [`Launcher::trigger`] creates a run document and hands the run to its own
//! [`RunMonitor`] on the tokio runtime, returning the run id without waiting.
//! Callers observe progress by polling [`Launcher::get_run`] or block on the
//! outcome with [`Launcher::wait`]. Monitors that finished without being
//! waited on are dropped on the next [`Launcher::trigger`] or
//! [`Launcher::active_runs`]; their outcome stays readable in the run document.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::monitor::RunMonitor;
use super::types::{MonitorConfig, SchedulerError};
use crate::config::EngineConfig;
use crate::core::catalog::DagCatalog;
use crate::core::types::{DagId, RunId, TaskId};
use crate::execution::{QueryService, RunContext, TaskExecutor};
use crate::state::{RunState, RunStatus, RunStore, RunSummary, StoreLayout};
use crate::storage::BlobStore;

type MonitorHandle = JoinHandle<Result<RunStatus, SchedulerError>>;

/// Starts runs and answers queries about them.
pub struct Launcher {
    catalog: Arc<DagCatalog>,
    blobs: Arc<dyn BlobStore>,
    query_service: Arc<dyn QueryService>,
    run_store: RunStore,
    executor: TaskExecutor,
    monitor_config: MonitorConfig,
    /// Monitors that have not been awaited or pruned yet.
    monitors: Arc<Mutex<HashMap<RunId, (DagId, MonitorHandle)>>>,
}

impl Launcher {
    /// Create a launcher with default settings.
    pub fn new(
        catalog: impl Into<Arc<DagCatalog>>,
        blobs: Arc<dyn BlobStore>,
        query_service: Arc<dyn QueryService>,
    ) -> Self {
        let run_store = RunStore::new(Arc::clone(&blobs));
        let executor = TaskExecutor::new(run_store.clone(), Arc::clone(&query_service));
        Self {
            catalog: catalog.into(),
            blobs,
            query_service,
            run_store,
            executor,
            monitor_config: MonitorConfig::default(),
            monitors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Apply engine settings: pool size, poll interval, timeout and layout.
    pub fn with_config(self, config: &EngineConfig) -> Self {
        let run_store = RunStore::with_layout(Arc::clone(&self.blobs), config.layout());
        let mut executor = TaskExecutor::new(run_store.clone(), Arc::clone(&self.query_service));
        if let Some(timeout) = config.task_timeout() {
            executor = executor.with_timeout(timeout);
        }
        Self {
            run_store,
            executor,
            monitor_config: config.monitor_config(),
            ..self
        }
    }

    /// Replace the monitor settings.
    pub fn with_monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    /// Use a custom store layout.
    pub fn with_layout(mut self, layout: StoreLayout) -> Self {
        self.run_store = RunStore::with_layout(Arc::clone(&self.blobs), layout);
        let mut executor = TaskExecutor::new(self.run_store.clone(), Arc::clone(&self.query_service));
        if let Some(timeout) = self.executor.timeout() {
            executor = executor.with_timeout(timeout);
        }
        self.executor = executor;
        self
    }

    /// The DAG catalog.
    pub fn catalog(&self) -> &DagCatalog {
        &self.catalog
    }

    /// The run store runs are persisted in.
    pub fn run_store(&self) -> &RunStore {
        &self.run_store
    }

    /// Current monitor settings.
    pub fn monitor_config(&self) -> &MonitorConfig {
        &self.monitor_config
    }

    /// Registered DAG ids, sorted.
    pub fn dag_ids(&self) -> Vec<DagId> {
        self.catalog.dag_ids()
    }

    /// Start a new run of `dag_id` and return its id immediately.
    ///
    /// Fails with [`SchedulerError::DagNotFound`] before anything is written
    /// when the DAG is not registered.
    pub async fn trigger(&self, dag_id: &DagId) -> Result<RunId, SchedulerError> {
        let dag = self
            .catalog
            .get(dag_id)
            .ok_or_else(|| SchedulerError::DagNotFound(dag_id.clone()))?;

        let run_id = RunId::new();
        let state = RunState::new(&dag, run_id.clone(), self.run_store.layout());
        self.run_store.create(&state).await?;

        info!(dag = %dag_id, run = %run_id, tasks = dag.len(), "Triggered run");

        let monitor = RunMonitor::new(
            RunContext::new(dag, run_id.clone()),
            self.executor.clone(),
            self.monitor_config.clone(),
        );
        let handle = tokio::spawn(monitor.run());

        let finished = {
            let mut monitors = self.monitors.lock().await;
            let finished = take_finished(&mut monitors);
            monitors.insert(run_id.clone(), (dag_id.clone(), handle));
            finished
        };
        reap(finished).await;

        Ok(run_id)
    }

    /// Wait for a run started by this launcher to finish.
    ///
    /// Each run can be waited on once, and only while it is still tracked:
    /// a run that already finished may have been pruned, in which case this
    /// returns [`SchedulerError::RunNotFound`] and [`Launcher::get_run`] has
    /// the outcome.
    pub async fn wait(&self, run_id: &RunId) -> Result<RunStatus, SchedulerError> {
        let (_, handle) = self
            .monitors
            .lock()
            .await
            .remove(run_id)
            .ok_or_else(|| SchedulerError::RunNotFound(run_id.clone()))?;

        handle
            .await
            .map_err(|e| SchedulerError::Join(e.to_string()))?
    }

    /// Runs whose monitor is still going, sorted.
    pub async fn active_runs(&self) -> Vec<(DagId, RunId)> {
        let (mut active, finished) = {
            let mut monitors = self.monitors.lock().await;
            let finished = take_finished(&mut monitors);
            let active: Vec<(DagId, RunId)> = monitors
                .iter()
                .map(|(run_id, (dag_id, _))| (dag_id.clone(), run_id.clone()))
                .collect();
            (active, finished)
        };
        reap(finished).await;
        active.sort();
        active
    }

    /// Wait for every outstanding monitor to finish.
    pub async fn shutdown(&self) {
        let monitors: Vec<(RunId, (DagId, MonitorHandle))> =
            self.monitors.lock().await.drain().collect();

        info!(runs = monitors.len(), "Waiting for outstanding runs");
        reap(monitors).await;
    }

    /// Load a run document.
    pub async fn get_run(&self, dag_id: &DagId, run_id: &RunId) -> Result<RunState, SchedulerError> {
        self.run_store
            .load(dag_id, run_id)
            .await?
            .ok_or_else(|| SchedulerError::RunNotFound(run_id.clone()))
    }

    /// Read the log text of one task instance.
    pub async fn get_task_log(
        &self,
        dag_id: &DagId,
        run_id: &RunId,
        task_id: &TaskId,
    ) -> Result<String, SchedulerError> {
        let state = self.get_run(dag_id, run_id).await?;
        let instance = state
            .instance(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                run_id: run_id.clone(),
                task_id: task_id.clone(),
            })?;

        self.run_store
            .read_log(&instance.log_file_path)
            .await?
            .ok_or_else(|| SchedulerError::LogNotFound {
                run_id: run_id.clone(),
                task_id: task_id.clone(),
            })
    }

    /// Summaries of a DAG's runs, most recent first.
    pub async fn list_runs(&self, dag_id: &DagId) -> Result<Vec<RunSummary>, SchedulerError> {
        Ok(self.run_store.list_run_summaries(dag_id).await?)
    }

    /// Summary of the most recent run of a DAG, if any.
    pub async fn latest_run(&self, dag_id: &DagId) -> Result<Option<RunSummary>, SchedulerError> {
        let Some(run_id) = self.run_store.list_runs(dag_id).await?.into_iter().next() else {
            return Ok(None);
        };
        Ok(self
            .run_store
            .load(dag_id, &run_id)
            .await?
            .map(|state| state.summary()))
    }
}

/// Remove monitors whose task already completed.
fn take_finished(
    monitors: &mut HashMap<RunId, (DagId, MonitorHandle)>,
) -> Vec<(RunId, (DagId, MonitorHandle))> {
    let done: Vec<RunId> = monitors
        .iter()
        .filter(|(_, (_, handle))| handle.is_finished())
        .map(|(run_id, _)| run_id.clone())
        .collect();
    done.into_iter()
        .filter_map(|run_id| monitors.remove(&run_id).map(|entry| (run_id, entry)))
        .collect()
}

/// Await monitors and log how they ended.
async fn reap(monitors: Vec<(RunId, (DagId, MonitorHandle))>) {
    for (run_id, (dag_id, handle)) in monitors {
        match handle.await {
            Ok(Ok(status)) => debug!(dag = %dag_id, run = %run_id, status = %status, "Released monitor"),
            Ok(Err(e)) => warn!(dag = %dag_id, run = %run_id, error = %e, "Run stopped with error"),
            Err(e) => warn!(dag = %dag_id, run = %run_id, error = %e, "Monitor task failed"),
        }
    }
}
