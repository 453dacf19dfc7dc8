//! Task execution.
//!
//! This module provides the query service seam, an external-command service
//! implementation, and the executor that runs a single task instance.

mod command;
mod executor;
mod query;

pub use command::{CommandQueryService, CommandQueryServiceBuilder, RowCount};
pub use executor::{ExecutorError, RunContext, TaskExecutor, TaskOutcome};
pub use query::{QueryError, QueryService};
