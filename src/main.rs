//! dagrun - a minimal DAG execution engine.
//!
//! Usage:
//!   dagrun validate <dags-dir>                       Validate DAG definitions
//!   dagrun list <dags-dir>                           List DAGs and their latest run
//!   dagrun trigger <dags-dir> <dag-id> [--wait]      Run a DAG once
//!   dagrun runs <dags-dir> <dag-id>                  List runs of a DAG
//!   dagrun show <dag-id> <run-id>                    Show a run document
//!   dagrun log <dag-id> <run-id> <task-id>           Print a task log

use clap::{Parser, Subcommand};
use dagrun::config::ENGINE_CONFIG_FILE;
use dagrun::{
    DagCatalog, DagId, EngineConfig, Launcher, RunId, RunState, RunStatus, RunStore, TaskId,
    TaskStatus, YamlLoader, load_dags_from_directory, open_blob_store,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// dagrun - a minimal DAG execution engine
#[derive(Parser)]
#[command(name = "dagrun")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine settings file (default: <DAGS_DIR>/dagrun.yaml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate DAG definitions without running them
    Validate {
        /// Path to the directory containing DAG YAML files
        #[arg(value_name = "DAGS_DIR")]
        dags_dir: PathBuf,
    },

    /// List all DAGs in the directory
    List {
        /// Path to the directory containing DAG YAML files
        #[arg(value_name = "DAGS_DIR")]
        dags_dir: PathBuf,
    },

    /// Trigger a DAG run and keep the process up until it finishes
    Trigger {
        /// Path to the directory containing DAG YAML files
        #[arg(value_name = "DAGS_DIR")]
        dags_dir: PathBuf,

        /// DAG ID to trigger
        #[arg(value_name = "DAG_ID")]
        dag_id: String,

        /// Poll the run document and print progress while waiting
        #[arg(short, long)]
        wait: bool,
    },

    /// List runs of a DAG, most recent first
    Runs {
        /// Path to the directory containing DAG YAML files
        #[arg(value_name = "DAGS_DIR")]
        dags_dir: PathBuf,

        /// DAG ID
        #[arg(value_name = "DAG_ID")]
        dag_id: String,
    },

    /// Show the state of one run
    Show {
        /// DAG ID
        #[arg(value_name = "DAG_ID")]
        dag_id: String,

        /// Run ID
        #[arg(value_name = "RUN_ID")]
        run_id: String,
    },

    /// Print the log of one task instance
    Log {
        /// DAG ID
        #[arg(value_name = "DAG_ID")]
        dag_id: String,

        /// Run ID
        #[arg(value_name = "RUN_ID")]
        run_id: String,

        /// Task ID
        #[arg(value_name = "TASK_ID")]
        task_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command {
        Commands::Validate { dags_dir } => {
            validate_dags(&dags_dir, config_path.as_deref())?;
        }
        Commands::List { dags_dir } => {
            list_dags(&dags_dir, config_path.as_deref()).await?;
        }
        Commands::Trigger {
            dags_dir,
            dag_id,
            wait,
        } => {
            trigger_dag(&dags_dir, config_path.as_deref(), dag_id, wait).await?;
        }
        Commands::Runs { dags_dir, dag_id } => {
            list_runs(&dags_dir, config_path.as_deref(), dag_id).await?;
        }
        Commands::Show { dag_id, run_id } => {
            show_run(config_path.as_deref(), dag_id, &run_id).await?;
        }
        Commands::Log {
            dag_id,
            run_id,
            task_id,
        } => {
            show_log(config_path.as_deref(), dag_id, &run_id, task_id).await?;
        }
    }

    Ok(())
}

/// Resolve engine settings: explicit file, then `<dags_dir>/dagrun.yaml`,
/// then defaults. Environment overrides apply last.
fn load_engine_config(
    dags_dir: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match (explicit, dags_dir) {
        (Some(path), _) => YamlLoader::load_engine_config(path)?,
        (None, Some(dir)) if dir.join(ENGINE_CONFIG_FILE).is_file() => {
            YamlLoader::load_engine_config(dir.join(ENGINE_CONFIG_FILE))?
        }
        _ => EngineConfig::default(),
    };
    config.apply_process_env()?;
    YamlLoader::validate_engine_config(&config)?;
    Ok(config)
}

/// Build a launcher over the DAGs in `dags_dir`.
async fn build_launcher(
    dags_dir: &Path,
    config: &EngineConfig,
) -> Result<Launcher, Box<dyn std::error::Error>> {
    let dags = load_dags_from_directory(dags_dir)?;
    let catalog = DagCatalog::from_dags(dags)?;
    let blobs = open_blob_store(&config.storage).await?;

    let query_service: Arc<dyn dagrun::QueryService> = match &config.query {
        Some(query) => Arc::new(query.to_service()),
        None => Arc::new(NoQueryService),
    };

    Ok(Launcher::new(catalog, blobs, query_service).with_config(config))
}

/// Stand-in used when no query command is configured; every task fails.
struct NoQueryService;

#[async_trait::async_trait]
impl dagrun::QueryService for NoQueryService {
    async fn execute(&self, _query: &str) -> Result<u64, dagrun::QueryError> {
        Err(dagrun::QueryError::Failed(
            "no query command configured (set `query.command` in dagrun.yaml)".to_string(),
        ))
    }
}

/// Validate DAG definitions without running.
fn validate_dags(
    dags_dir: &Path,
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating DAGs in: {}", dags_dir.display());

    load_engine_config(Some(dags_dir), config_path)?;

    match load_dags_from_directory(dags_dir).map(DagCatalog::from_dags) {
        Ok(Ok(catalog)) => {
            info!("All {} DAG(s) are valid:", catalog.len());
            for dag_id in catalog.dag_ids() {
                info!("  - {}: OK", dag_id);
            }
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List all DAGs in the directory with their latest run.
async fn list_dags(
    dags_dir: &Path,
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_engine_config(Some(dags_dir), config_path)?;
    let launcher = build_launcher(dags_dir, &config).await?;

    if launcher.catalog().is_empty() {
        println!("No DAGs found in {}", dags_dir.display());
        return Ok(());
    }

    println!("DAGs in {}:", dags_dir.display());
    println!();

    for dag_id in launcher.dag_ids() {
        let Some(dag) = launcher.catalog().get(&dag_id) else {
            continue;
        };
        println!("ID: {}", dag_id);
        println!("  Schedule: {}", dag.schedule().unwrap_or("manual only"));
        println!("  Tasks: {}", dag.len());

        for task_id in dag.topological_order()? {
            let deps = dag.dependencies(&task_id).unwrap_or(&[]);
            if deps.is_empty() {
                println!("    - {}", task_id);
            } else {
                let dep_names: Vec<&str> = deps.iter().map(|d| d.as_str()).collect();
                println!("    - {} (depends on: {})", task_id, dep_names.join(", "));
            }
        }

        match launcher.latest_run(&dag_id).await? {
            Some(run) => println!("  Latest run: {} ({})", run.run_id, run.status),
            None => println!("  Latest run: none"),
        }
        println!();
    }

    Ok(())
}

/// Trigger a DAG and stay up until its run finishes.
async fn trigger_dag(
    dags_dir: &Path,
    config_path: Option<&Path>,
    dag_id: String,
    wait: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_engine_config(Some(dags_dir), config_path)?;
    if config.query.is_none() {
        warn!("No query command configured, every task will fail");
    }

    let launcher = build_launcher(dags_dir, &config).await?;
    let dag_id = DagId::new(dag_id);

    let run_id = match launcher.trigger(&dag_id).await {
        Ok(run_id) => run_id,
        Err(e) => {
            error!("Failed to trigger DAG: {}", e);
            let available: Vec<String> = launcher.dag_ids().iter().map(|d| d.to_string()).collect();
            error!("Available DAGs: {}", available.join(", "));
            return Err(e.into());
        }
    };
    println!("Triggered {} (run: {})", dag_id, run_id);

    if wait {
        let mut last_printed = String::new();
        loop {
            let state = launcher.get_run(&dag_id, &run_id).await?;
            let line = progress_line(&state);
            if line != last_printed {
                println!("{}", line);
                last_printed = line;
            }
            if state.status.is_terminal() {
                break;
            }
            tokio::time::sleep(config.poll_interval()).await;
        }
    }

    let status = launcher.wait(&run_id).await?;
    let state = launcher.get_run(&dag_id, &run_id).await?;
    print_run(&state);

    if status == RunStatus::Failed {
        return Err(format!("run {} failed", run_id).into());
    }
    Ok(())
}

fn progress_line(state: &RunState) -> String {
    format!(
        "[{}] queued={} pending={} running={} success={} failed={}",
        state.status,
        state.count(TaskStatus::Queued),
        state.count(TaskStatus::Pending),
        state.count(TaskStatus::Running),
        state.count(TaskStatus::Success),
        state.count(TaskStatus::Failed),
    )
}

/// List the runs of a DAG.
async fn list_runs(
    dags_dir: &Path,
    config_path: Option<&Path>,
    dag_id: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_engine_config(Some(dags_dir), config_path)?;
    let launcher = build_launcher(dags_dir, &config).await?;
    let dag_id = DagId::new(dag_id);

    if !launcher.catalog().contains(&dag_id) {
        warn!("DAG '{}' is not defined in {}", dag_id, dags_dir.display());
    }

    let runs = launcher.list_runs(&dag_id).await?;
    if runs.is_empty() {
        println!("No runs found for {}", dag_id);
        return Ok(());
    }

    for run in runs {
        let ended = run
            .end_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<8}  started {}  ended {}",
            run.run_id,
            run.status,
            run.start_time.to_rfc3339(),
            ended
        );
    }
    Ok(())
}

/// Print a run document.
async fn show_run(
    config_path: Option<&Path>,
    dag_id: String,
    run_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_engine_config(None, config_path)?;
    let store = RunStore::with_layout(open_blob_store(&config.storage).await?, config.layout());
    let run_id = RunId::parse(run_id)?;
    let dag_id = DagId::new(dag_id);

    match store.load(&dag_id, &run_id).await? {
        Some(state) => {
            print_run(&state);
            Ok(())
        }
        None => Err(format!("run {} of {} not found", run_id, dag_id).into()),
    }
}

/// Print one task log.
async fn show_log(
    config_path: Option<&Path>,
    dag_id: String,
    run_id: &str,
    task_id: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_engine_config(None, config_path)?;
    let store = RunStore::with_layout(open_blob_store(&config.storage).await?, config.layout());
    let run_id = RunId::parse(run_id)?;
    let dag_id = DagId::new(dag_id);
    let task_id = TaskId::new(task_id);

    let path = config.layout().log_path(&dag_id, &run_id, &task_id);
    match store.read_log(&path).await? {
        Some(text) => {
            println!("{}", text);
            Ok(())
        }
        None => Err(format!("no log for task '{}' in run {}", task_id, run_id).into()),
    }
}

fn print_run(state: &RunState) {
    println!("Run {} of {}: {}", state.run_id, state.dag_id, state.status);
    println!("  Started: {}", state.start_time.to_rfc3339());
    if let Some(end) = state.end_time {
        println!("  Ended:   {}", end.to_rfc3339());
    }
    for instance in &state.task_instances {
        println!("    - {:<20} {}", instance.task_id.as_str(), instance.status);
    }
}
