//! Directed Acyclic Graph (DAG) of tasks.
//!
//! A DAG defines the execution order of tasks based on their dependencies.
//! A DAG is validated when it is constructed and is immutable afterwards:
//! every dependency must name a task of the same DAG, and the dependency
//! graph must not contain a cycle.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use super::task::Task;
use super::types::{DagId, TaskId};

/// Errors that can occur when constructing a DAG.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    /// A dependency references a task that doesn't exist.
    #[error("task '{task}' depends on non-existent task '{dependency}'")]
    InvalidDependency { task: TaskId, dependency: TaskId },

    /// The dependency graph contains a cycle. Holds the tasks left unresolved.
    #[error("dependency cycle detected involving tasks: {}", join_ids(.0))]
    CyclicDependency(Vec<TaskId>),

    /// Two tasks share the same identifier.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),

    /// The DAG identifier is blank.
    #[error("dag id must not be empty")]
    EmptyDagId,
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
}

/// A validated Directed Acyclic Graph of tasks.
#[derive(Debug, Clone)]
pub struct Dag {
    id: DagId,

    /// Schedule expression carried for display only; the engine never acts on it.
    schedule: Option<String>,

    /// Tasks in declaration order.
    tasks: Vec<Task>,

    /// Position of each task in `tasks`.
    index: HashMap<TaskId, usize>,
}

impl Dag {
    /// Build and validate a DAG.
    pub fn new(
        id: impl Into<DagId>,
        schedule: Option<String>,
        tasks: Vec<Task>,
    ) -> Result<Self, DagError> {
        let id = id.into();
        if id.as_str().trim().is_empty() {
            return Err(DagError::EmptyDagId);
        }

        let mut index = HashMap::with_capacity(tasks.len());
        for (pos, task) in tasks.iter().enumerate() {
            if index.insert(task.id().clone(), pos).is_some() {
                return Err(DagError::DuplicateTask(task.id().clone()));
            }
        }

        let dag = Self {
            id,
            schedule,
            tasks,
            index,
        };
        dag.validate()?;
        Ok(dag)
    }

    /// Get the DAG ID.
    pub fn id(&self) -> &DagId {
        &self.id
    }

    /// Get the schedule placeholder, if one was declared.
    pub fn schedule(&self) -> Option<&str> {
        self.schedule.as_deref()
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Check if the DAG has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Get the number of tasks in the DAG.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Get a task by ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).map(|&pos| &self.tasks[pos])
    }

    /// Get the dependencies of a task.
    pub fn dependencies(&self, id: &TaskId) -> Option<&[TaskId]> {
        self.get_task(id).map(Task::dependencies)
    }

    /// Get tasks that depend directly on the given task, in declaration order.
    pub fn downstream(&self, id: &TaskId) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|task| task.dependencies().contains(id))
            .map(|task| task.id().clone())
            .collect()
    }

    /// Validate dependencies and acyclicity.
    pub fn validate(&self) -> Result<(), DagError> {
        for task in &self.tasks {
            for dep in task.dependencies() {
                if !self.index.contains_key(dep) {
                    return Err(DagError::InvalidDependency {
                        task: task.id().clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Return task ids in a dependency-respecting order.
    ///
    /// Ties are broken by declaration order, so the result is deterministic.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, DagError> {
        // Kahn's algorithm over positions
        let mut in_degree: Vec<usize> = self
            .tasks
            .iter()
            .map(|task| task.dependencies().len())
            .collect();
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.tasks.len()];

        for (pos, task) in self.tasks.iter().enumerate() {
            for dep in task.dependencies() {
                if let Some(&dep_pos) = self.index.get(dep) {
                    downstream[dep_pos].push(pos);
                }
            }
        }

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(pos, _)| pos)
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(pos) = queue.pop_front() {
            order.push(self.tasks[pos].id().clone());

            for &next in &downstream[pos] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != self.tasks.len() {
            let stuck: Vec<TaskId> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, degree)| **degree > 0)
                .map(|(pos, _)| self.tasks[pos].id().clone())
                .collect();
            return Err(DagError::CyclicDependency(stuck));
        }

        Ok(order)
    }

    /// Get all task IDs in declaration order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|task| task.id().clone()).collect()
    }
}

/// Builder for constructing DAGs fluently.
pub struct DagBuilder {
    id: DagId,
    schedule: Option<String>,
    tasks: Vec<Task>,
}

impl DagBuilder {
    /// Create a new DAG builder.
    pub fn new(id: impl Into<DagId>) -> Self {
        Self {
            id: id.into(),
            schedule: None,
            tasks: Vec::new(),
        }
    }

    /// Attach a schedule expression (stored, not acted on).
    pub fn schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    /// Add a task.
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Add a task with no dependencies.
    pub fn add_task(self, id: &str, query: &str) -> Self {
        self.task(Task::new(id, query))
    }

    /// Add a task with dependencies.
    pub fn add_task_with_deps(self, id: &str, query: &str, depends_on: &[&str]) -> Self {
        self.task(Task::new(id, query).depends_on(depends_on.iter().copied()))
    }

    /// Build the DAG, validating it in the process.
    pub fn build(self) -> Result<Dag, DagError> {
        Dag::new(self.id, self.schedule, self.tasks)
    }
}
