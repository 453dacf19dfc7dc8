//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for DAGs and engine settings.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{DagConfigBuilder, load_dags_from_directory, open_blob_store};
pub use error::ConfigError;
pub use types::{
    DagConfig, ENGINE_CONFIG_FILE, ENV_MAX_PARALLEL_TASKS, ENV_POLL_INTERVAL_MS, ENV_STATE_PREFIX,
    EngineConfig, QueryCommandConfig, StorageConfig, TaskConfig,
};
pub use yaml::YamlLoader;
