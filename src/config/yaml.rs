//! YAML configuration parsing.
//!
//! Parses DAG definitions and engine settings from YAML files.

use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::{DagConfig, EngineConfig, StorageConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load engine settings from a file.
    pub fn load_engine_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        Self::parse_engine_config(&content).map_err(|e| with_path(e, path))
    }

    /// Parse engine settings from a YAML string.
    pub fn parse_engine_config(yaml: &str) -> Result<EngineConfig, ConfigError> {
        // an empty document means all defaults
        let config: EngineConfig = if yaml.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        Self::validate_engine_config(&config)?;
        Ok(config)
    }

    /// Load a DAG definition from a file.
    pub fn load_dag_config(path: impl AsRef<Path>) -> Result<DagConfig, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        Self::parse_dag_config(&content).map_err(|e| with_path(e, path))
    }

    /// Parse a DAG definition from a YAML string.
    pub fn parse_dag_config(yaml: &str) -> Result<DagConfig, ConfigError> {
        let config: DagConfig = serde_yaml::from_str(yaml)?;
        Self::validate_dag_config(&config)?;
        Ok(config)
    }

    /// Validate engine settings.
    pub fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
        if config.max_parallel_tasks == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_parallel_tasks cannot be zero".into(),
            ));
        }

        if config.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "poll_interval_ms cannot be zero".into(),
            ));
        }

        if config.task_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "task_timeout_secs cannot be zero".into(),
            ));
        }

        if config.state_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::MissingField("state_prefix".into()));
        }

        if let StorageConfig::Sqlite { path } = &config.storage
            && path.is_empty()
        {
            return Err(ConfigError::MissingField("storage.path".into()));
        }

        if let Some(query) = &config.query
            && query.command.is_empty()
        {
            return Err(ConfigError::MissingField("query.command".into()));
        }

        Ok(())
    }

    /// Validate a DAG definition.
    ///
    /// Dependency and cycle checks happen when the DAG is built.
    fn validate_dag_config(config: &DagConfig) -> Result<(), ConfigError> {
        if config.id.is_empty() {
            return Err(ConfigError::MissingField("id".into()));
        }

        if config.tasks.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "dag must have at least one task".into(),
            ));
        }

        let mut task_ids: HashSet<&str> = HashSet::new();
        for task in &config.tasks {
            if task.id.is_empty() {
                return Err(ConfigError::MissingField("tasks[].id".into()));
            }
            if task.query.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "task '{}' has an empty query",
                    task.id
                )));
            }
            if !task_ids.insert(&task.id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
            if task.depends_on.iter().any(|dep| dep == &task.id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "task '{}' cannot depend on itself",
                    task.id
                )));
            }
        }

        Ok(())
    }
}

fn with_path(err: ConfigError, path: &Path) -> ConfigError {
    match err {
        ConfigError::YamlError(source) => ConfigError::YamlFileError {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}
