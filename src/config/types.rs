//! Configuration type definitions.
//!
//! This module contains the type definitions for YAML configuration: the
//! engine-wide settings file and one definition file per DAG.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::execution::{CommandQueryService, RowCount};
use crate::scheduler::MonitorConfig;
use crate::state::StoreLayout;

use super::error::ConfigError;

/// File name of the engine settings inside a DAG directory.
pub const ENGINE_CONFIG_FILE: &str = "dagrun.yaml";

/// Environment variable overriding `max_parallel_tasks`.
pub const ENV_MAX_PARALLEL_TASKS: &str = "DAGRUN_MAX_PARALLEL_TASKS";
/// Environment variable overriding `poll_interval_ms`.
pub const ENV_POLL_INTERVAL_MS: &str = "DAGRUN_POLL_INTERVAL_MS";
/// Environment variable overriding `state_prefix`.
pub const ENV_STATE_PREFIX: &str = "DAGRUN_STATE_PREFIX";

/// Engine settings (dagrun.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size per run.
    pub max_parallel_tasks: usize,
    /// Monitor poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Per-task timeout in seconds. Tasks run unbounded when unset.
    pub task_timeout_secs: Option<u64>,
    /// Where run documents and logs are kept.
    pub storage: StorageConfig,
    /// Root path of run documents inside the store.
    pub state_prefix: String,
    /// External command used to execute task queries.
    pub query: Option<QueryCommandConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 4,
            poll_interval_ms: 5_000,
            task_timeout_secs: None,
            storage: StorageConfig::default(),
            state_prefix: "dag_runs".to_string(),
            query: None,
        }
    }
}

impl EngineConfig {
    /// Monitor poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-task timeout, if any.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// Monitor settings derived from this config.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::default()
            .with_poll_interval(self.poll_interval())
            .with_max_parallel_tasks(self.max_parallel_tasks)
    }

    /// Store layout derived from this config.
    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(&self.state_prefix)
    }

    /// Override settings from environment variables looked up via `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_PARALLEL_TASKS) {
            self.max_parallel_tasks = parse_env(ENV_MAX_PARALLEL_TASKS, &value)?;
        }
        if let Some(value) = lookup(ENV_POLL_INTERVAL_MS) {
            self.poll_interval_ms = parse_env(ENV_POLL_INTERVAL_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_STATE_PREFIX) {
            self.state_prefix = value;
        }
        Ok(())
    }

    /// Override settings from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::InvalidConfig(format!("{} has an invalid value: '{}'", key, value))
    })
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// External command that executes queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCommandConfig {
    /// Program to run.
    pub command: String,
    /// Arguments placed before the query.
    #[serde(default)]
    pub args: Vec<String>,
    /// Pass the query on stdin instead of as the last argument.
    #[serde(default)]
    pub stdin: bool,
    /// How rows are counted from stdout.
    #[serde(default)]
    pub row_count: RowCount,
    /// Environment variables for the command.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Working directory.
    pub working_dir: Option<String>,
}

impl QueryCommandConfig {
    /// Build the query service described by this config.
    pub fn to_service(&self) -> CommandQueryService {
        let mut builder = CommandQueryService::builder(&self.command)
            .args(&self.args)
            .query_on_stdin(self.stdin)
            .row_count(self.row_count)
            .envs(&self.environment);
        if let Some(dir) = &self.working_dir {
            builder = builder.working_dir(dir);
        }
        builder.build()
    }
}

/// DAG definition from YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagConfig {
    /// DAG identifier.
    pub id: String,
    /// Schedule expression, kept for display.
    pub schedule: Option<String>,
    /// Task definitions.
    pub tasks: Vec<TaskConfig>,
}

/// Task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task identifier (unique within the DAG).
    pub id: String,
    /// Query handed to the query service.
    pub query: String,
    /// Dependencies on other tasks in this DAG.
    #[serde(default)]
    pub depends_on: Vec<String>,
}
