//! Task definition.
//!
//! A [`Task`] is the unit-of-work template inside a DAG: an identifier, the
//! query it runs, and the tasks it depends on. Tasks are plain data; how the
//! query is executed is decided by the [`QueryService`](crate::QueryService)
//! the engine is wired with.

use serde::{Deserialize, Serialize};

use super::types::TaskId;

/// A task template within a DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    query: String,
    #[serde(default)]
    depends_on: Vec<TaskId>,
}

impl Task {
    /// Create a task with no dependencies.
    pub fn new(id: impl Into<TaskId>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            depends_on: Vec::new(),
        }
    }

    /// Declare upstream tasks. Repeated ids are collapsed, declaration order is kept.
    pub fn depends_on<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.depends_on.contains(&dep) {
                self.depends_on.push(dep);
            }
        }
        self
    }

    /// The task identifier.
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// The query this task submits to the query service.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Tasks that must succeed before this one is dispatched.
    pub fn dependencies(&self) -> &[TaskId] {
        &self.depends_on
    }
}
