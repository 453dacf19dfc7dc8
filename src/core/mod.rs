//! Static workflow model: identifiers, tasks, DAGs, and the DAG catalog.

pub mod catalog;
pub mod dag;
pub mod task;
pub mod types;
