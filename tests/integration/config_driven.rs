//! Runs driven entirely by YAML files on disk and a shell query command.

use dagrun::{
    DagCatalog, DagId, Launcher, RunStatus, TaskId, YamlLoader, load_dags_from_directory,
    open_blob_store,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const ENGINE_YAML: &str = r#"
max_parallel_tasks: 2
poll_interval_ms: 10
task_timeout_secs: 5
state_prefix: test_runs
storage:
  type: memory
query:
  command: sh
  args: ["-c"]
"#;

const REPORT_DAG: &str = r#"
id: nightly_report
schedule: "0 2 * * *"
tasks:
  - id: extract
    query: "printf 'a\nb\nc\n'"
  - id: transform
    query: "echo 1; echo 2"
    depends_on: [extract]
  - id: publish
    query: "echo done"
    depends_on: [transform]
"#;

const BROKEN_DAG: &str = r#"
id: broken_report
tasks:
  - id: extract
    query: "echo 'relation missing' >&2; exit 3"
  - id: publish
    query: "echo never"
    depends_on: [extract]
"#;

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

async fn launcher_from_dir(dir: &Path) -> Launcher {
    let config = YamlLoader::load_engine_config(dir.join("dagrun.yaml")).unwrap();
    let dags = load_dags_from_directory(dir).unwrap();
    let blobs = open_blob_store(&config.storage).await.unwrap();
    let service = Arc::new(config.query.as_ref().unwrap().to_service());

    Launcher::new(DagCatalog::from_dags(dags).unwrap(), blobs, service).with_config(&config)
}

#[tokio::test]
async fn test_yaml_dag_runs_through_shell_commands() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "dagrun.yaml", ENGINE_YAML);
    write(temp.path(), "nightly.yaml", REPORT_DAG);

    let launcher = launcher_from_dir(temp.path()).await;
    assert_eq!(launcher.dag_ids(), vec![DagId::new("nightly_report")]);
    assert_eq!(launcher.monitor_config().max_parallel_tasks, 2);

    let dag_id = DagId::new("nightly_report");
    let run_id = launcher.trigger(&dag_id).await.unwrap();
    assert_eq!(launcher.wait(&run_id).await.unwrap(), RunStatus::Success);

    let run = launcher.get_run(&dag_id, &run_id).await.unwrap();
    let extract = run.instance(&TaskId::new("extract")).unwrap();
    assert!(
        extract
            .log_file_path
            .starts_with(&format!("test_runs/nightly_report/{}/logs/", run_id))
    );

    let extract_log = launcher
        .get_task_log(&dag_id, &run_id, &TaskId::new("extract"))
        .await
        .unwrap();
    assert!(extract_log.contains("Rows affected/processed: 3"));

    let transform_log = launcher
        .get_task_log(&dag_id, &run_id, &TaskId::new("transform"))
        .await
        .unwrap();
    assert!(transform_log.contains("Rows affected/processed: 2"));
}

#[tokio::test]
async fn test_yaml_dag_failure_logs_stderr() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "dagrun.yaml", ENGINE_YAML);
    write(temp.path(), "broken.yml", BROKEN_DAG);

    let launcher = launcher_from_dir(temp.path()).await;
    let dag_id = DagId::new("broken_report");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    assert_eq!(launcher.wait(&run_id).await.unwrap(), RunStatus::Failed);

    let log = launcher
        .get_task_log(&dag_id, &run_id, &TaskId::new("extract"))
        .await
        .unwrap();
    assert_eq!(log, "Task extract failed.\nError: relation missing");

    let run = launcher.get_run(&dag_id, &run_id).await.unwrap();
    assert_eq!(
        run.instance(&TaskId::new("publish")).unwrap().status,
        dagrun::TaskStatus::Queued
    );
}

#[tokio::test]
async fn test_cyclic_yaml_dag_is_rejected_on_load() {
    let temp = TempDir::new().unwrap();
    write(
        temp.path(),
        "cycle.yaml",
        r#"
id: cycle
tasks:
  - id: a
    query: "echo a"
    depends_on: [b]
  - id: b
    query: "echo b"
    depends_on: [a]
"#,
    );

    let err = load_dags_from_directory(temp.path()).unwrap_err();
    assert!(err.to_string().to_lowercase().contains("cycl"));
}
