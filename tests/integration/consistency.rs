//! Run document consistency under concurrent writers.

use dagrun::testing::ScriptedQueryService;
use dagrun::{
    BlobStore, DagBuilder, DagId, InMemoryBlobStore, Launcher, RunContext, RunId, RunMonitor,
    RunState, RunStatus, RunStore, TaskExecutor, TaskStatus,
};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{catalog, collect_snapshots, fast_monitor};

#[tokio::test]
async fn test_repeated_loads_see_identical_document() {
    let dag = DagBuilder::new("stable")
        .add_task("a", "qa")
        .add_task_with_deps("b", "qb", &["a"])
        .build()
        .unwrap();
    let launcher = Launcher::new(
        catalog(vec![dag]),
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(ScriptedQueryService::new()),
    )
    .with_monitor_config(fast_monitor());
    let dag_id = DagId::new("stable");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    launcher.wait(&run_id).await.unwrap();

    let first = launcher.get_run(&dag_id, &run_id).await.unwrap();
    let second = launcher.get_run(&dag_id, &run_id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.status, RunStatus::Success);
}

#[tokio::test]
async fn test_terminal_tasks_always_have_logs() {
    let dag = DagBuilder::new("logged")
        .add_task("a", "qa")
        .add_task("b", "qb")
        .add_task_with_deps("c", "qc", &["a", "b"])
        .build()
        .unwrap();
    let service = ScriptedQueryService::new().default_delay(Duration::from_millis(5));
    let launcher = Launcher::new(
        catalog(vec![dag]),
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(service),
    )
    .with_monitor_config(fast_monitor());
    let dag_id = DagId::new("logged");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    let snapshots = collect_snapshots(&launcher, &dag_id, &run_id, Duration::from_secs(5)).await;

    for snapshot in &snapshots {
        for instance in snapshot
            .task_instances
            .iter()
            .filter(|ti| ti.status.is_terminal())
        {
            let log = launcher
                .get_task_log(&dag_id, &run_id, &instance.task_id)
                .await
                .unwrap();
            assert!(log.starts_with(&format!("Task {}", instance.task_id)));
        }
    }
    launcher.wait(&run_id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_task_updates_are_never_lost() {
    let mut builder = DagBuilder::new("wide");
    for i in 0..16 {
        builder = builder.add_task(&format!("t{i:02}"), &format!("q{i:02}"));
    }
    let dag = Arc::new(builder.build().unwrap());

    let blobs: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
    let store = RunStore::new(blobs).with_max_attempts(1000);
    let run_id = RunId::new();
    store
        .create(&RunState::new(&dag, run_id.clone(), store.layout()))
        .await
        .unwrap();

    let service = Arc::new(ScriptedQueryService::new().default_delay(Duration::from_millis(2)));
    let executor = TaskExecutor::new(store.clone(), service.clone());
    let monitor = RunMonitor::new(
        RunContext::new(Arc::clone(&dag), run_id.clone()),
        executor,
        fast_monitor().with_max_parallel_tasks(16),
    );

    let status = monitor.run().await.unwrap();

    assert_eq!(status, RunStatus::Success);
    let run = store.load(dag.id(), &run_id).await.unwrap().unwrap();
    assert_eq!(run.count(TaskStatus::Success), 16);
    assert!(run.task_instances.iter().all(|ti| ti.end_time.is_some()));
    assert_eq!(service.call_count(), 16);
}

#[tokio::test]
async fn test_runs_of_different_dags_do_not_share_documents() {
    let first = DagBuilder::new("first").add_task("t", "q1").build().unwrap();
    let second = DagBuilder::new("second").add_task("t", "q2").build().unwrap();
    let launcher = Launcher::new(
        catalog(vec![first, second]),
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(ScriptedQueryService::new().fail("q2", "bad")),
    )
    .with_monitor_config(fast_monitor());

    let first_run = launcher.trigger(&DagId::new("first")).await.unwrap();
    assert_eq!(launcher.wait(&first_run).await.unwrap(), RunStatus::Success);
    let second_run = launcher.trigger(&DagId::new("second")).await.unwrap();
    assert_eq!(launcher.wait(&second_run).await.unwrap(), RunStatus::Failed);

    assert_eq!(launcher.list_runs(&DagId::new("first")).await.unwrap().len(), 1);
    assert_eq!(launcher.list_runs(&DagId::new("second")).await.unwrap().len(), 1);
    assert!(
        launcher
            .get_run(&DagId::new("first"), &second_run)
            .await
            .is_err()
    );
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_run_on_sqlite_store() {
    use dagrun::SqliteBlobStore;

    let dag = DagBuilder::new("sqlite_dag")
        .add_task("load", "q_load")
        .add_task_with_deps("aggregate", "q_aggregate", &["load"])
        .build()
        .unwrap();
    let blobs = Arc::new(SqliteBlobStore::in_memory().await.unwrap());
    let launcher = Launcher::new(
        catalog(vec![dag]),
        blobs,
        Arc::new(ScriptedQueryService::new().succeed("q_aggregate", 12)),
    )
    .with_monitor_config(fast_monitor());
    let dag_id = DagId::new("sqlite_dag");

    let run_id = launcher.trigger(&dag_id).await.unwrap();

    assert_eq!(launcher.wait(&run_id).await.unwrap(), RunStatus::Success);
    let log = launcher
        .get_task_log(&dag_id, &run_id, &dagrun::TaskId::new("aggregate"))
        .await
        .unwrap();
    assert!(log.contains("Rows affected/processed: 12"));
    assert_eq!(launcher.latest_run(&dag_id).await.unwrap().unwrap().run_id, run_id);
}
