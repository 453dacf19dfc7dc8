//! Store outages: a run whose document cannot be written stalls and is left
//! in its last persisted state.

use dagrun::testing::{FailingBlobStore, ScriptedQueryService};
use dagrun::{
    BlobStore, DagBuilder, DagId, Launcher, RunStatus, SchedulerError, TaskId, TaskStatus,
};
use std::sync::Arc;

use crate::common::{catalog, fast_monitor};

fn single_task_launcher(store: Arc<FailingBlobStore>) -> Launcher {
    let dag = DagBuilder::new("fragile")
        .add_task("load", "q_load")
        .build()
        .unwrap();
    Launcher::new(
        catalog(vec![dag]),
        store,
        Arc::new(ScriptedQueryService::new().succeed("q_load", 3)),
    )
    .with_monitor_config(fast_monitor())
}

#[tokio::test]
async fn test_trigger_during_outage_fails_without_run() {
    let store = Arc::new(FailingBlobStore::in_memory());
    let launcher = single_task_launcher(Arc::clone(&store));
    store.set_unavailable(true);

    let err = launcher.trigger(&DagId::new("fragile")).await.unwrap_err();

    assert!(matches!(err, SchedulerError::Storage(_)));
    assert!(launcher.active_runs().await.is_empty());

    store.set_unavailable(false);
    assert!(store.list("").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_outage_mid_run_stalls_run() {
    // create, PENDING and RUNNING succeed, the log write does not
    let store = Arc::new(FailingBlobStore::in_memory().fail_after_writes(3));
    let launcher = single_task_launcher(Arc::clone(&store));
    let dag_id = DagId::new("fragile");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    let result = launcher.wait(&run_id).await;

    assert!(matches!(result, Err(SchedulerError::Storage(_))));
    assert!(store.is_unavailable());

    store.set_unavailable(false);
    let run = launcher.get_run(&dag_id, &run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert!(run.end_time.is_none());
    assert_eq!(
        run.instance(&TaskId::new("load")).unwrap().status,
        TaskStatus::Running
    );
    assert!(matches!(
        launcher
            .get_task_log(&dag_id, &run_id, &TaskId::new("load"))
            .await,
        Err(SchedulerError::LogNotFound { .. })
    ));
}

#[tokio::test]
async fn test_reads_fail_during_outage() {
    let store = Arc::new(FailingBlobStore::in_memory());
    let launcher = single_task_launcher(Arc::clone(&store));
    let dag_id = DagId::new("fragile");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    assert_eq!(launcher.wait(&run_id).await.unwrap(), RunStatus::Success);

    store.set_unavailable(true);
    assert!(matches!(
        launcher.get_run(&dag_id, &run_id).await,
        Err(SchedulerError::Storage(_))
    ));
    assert!(launcher.list_runs(&dag_id).await.is_err());

    store.set_unavailable(false);
    let run = launcher.get_run(&dag_id, &run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
}
