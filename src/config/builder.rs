//! DAG and storage builders from YAML configuration.
//!
//! This module converts configuration into validated DAGs and opens the
//! configured blob store.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::core::dag::Dag;
use crate::core::task::Task;
use crate::storage::{BlobStore, InMemoryBlobStore};

use super::error::ConfigError;
use super::types::{DagConfig, ENGINE_CONFIG_FILE, StorageConfig};
use super::yaml::YamlLoader;

/// Builder for creating DAGs from YAML configuration.
pub struct DagConfigBuilder;

impl DagConfigBuilder {
    /// Build a validated DAG from a DagConfig.
    pub fn build(config: DagConfig) -> Result<Dag, ConfigError> {
        let tasks = config
            .tasks
            .into_iter()
            .map(|task| Task::new(task.id, task.query).depends_on(task.depends_on))
            .collect();

        Ok(Dag::new(config.id, config.schedule, tasks)?)
    }
}

/// Load all DAG definitions from a directory.
///
/// Reads every `.yaml`/`.yml` file except the engine settings file and
/// returns the DAGs sorted by id.
pub fn load_dags_from_directory(dir: impl AsRef<Path>) -> Result<Vec<Dag>, ConfigError> {
    let dir = dir.as_ref();
    let mut dags = Vec::new();

    if !dir.is_dir() {
        return Err(ConfigError::InvalidConfig(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::DirReadError {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::DirReadError {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        if path.file_name().is_some_and(|name| name == ENGINE_CONFIG_FILE) {
            continue;
        }

        if let Some(ext) = path.extension()
            && (ext == "yaml" || ext == "yml")
        {
            let config = YamlLoader::load_dag_config(&path)?;
            let dag = DagConfigBuilder::build(config)?;
            debug!(dag = %dag.id(), path = %path.display(), "Loaded dag");
            dags.push(dag);
        }
    }

    dags.sort_by(|a, b| a.id().cmp(b.id()));
    Ok(dags)
}

/// Open the blob store described by `config`.
pub async fn open_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, ConfigError> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryBlobStore::new())),
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            let store = crate::storage::SqliteBlobStore::new(path).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => Err(ConfigError::InvalidConfig(
            "sqlite storage requires the 'sqlite' feature".into(),
        )),
    }
}
