//! dagrun - a minimal DAG execution engine.
//!
//! A DAG is a set of tasks, each carrying an opaque query and a list of
//! upstream tasks. Triggering a DAG creates a run: a durable JSON document in
//! a blob store that records the status of every task instance. A monitor
//! loop polls that document, dispatches tasks whose dependencies all
//! succeeded to a bounded worker pool, and finishes the run as soon as a task
//! fails or once every task succeeded. Each task instance also gets a log
//! blob describing its outcome.
//!
//! ```no_run
//! use dagrun::{DagBuilder, DagCatalog, DagId, InMemoryBlobStore, Launcher};
//! use dagrun::testing::ScriptedQueryService;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dag = DagBuilder::new("daily_sales")
//!     .add_task("extract", "SELECT * FROM sales")
//!     .add_task_with_deps("report", "INSERT INTO report SELECT 1", &["extract"])
//!     .build()?;
//!
//! let launcher = Launcher::new(
//!     DagCatalog::from_dags([dag])?,
//!     Arc::new(InMemoryBlobStore::new()),
//!     Arc::new(ScriptedQueryService::new()),
//! );
//!
//! let run_id = launcher.trigger(&DagId::new("daily_sales")).await?;
//! let status = launcher.wait(&run_id).await?;
//! println!("{} finished: {}", run_id, status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod execution;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod testing;

pub use config::{
    ConfigError, DagConfig, DagConfigBuilder, EngineConfig, QueryCommandConfig, StorageConfig,
    TaskConfig, YamlLoader, load_dags_from_directory, open_blob_store,
};
pub use core::catalog::{CatalogError, DagCatalog, DagCatalogBuilder};
pub use core::dag::{Dag, DagBuilder, DagError};
pub use core::task::Task;
pub use core::types::{DagId, RunId, TaskId};
pub use execution::{
    CommandQueryService, CommandQueryServiceBuilder, ExecutorError, QueryError, QueryService,
    RowCount, RunContext, TaskExecutor, TaskOutcome,
};
pub use scheduler::{Launcher, MonitorConfig, RunMonitor, SchedulerError};
pub use state::{
    RunState, RunStatus, RunStore, RunStoreError, RunSummary, StateError, StoreLayout,
    TaskInstance, TaskStatus,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteBlobStore;
pub use storage::{Blob, BlobStore, InMemoryBlobStore, StorageError, Version};
