//! End-to-end run scenarios.
//!
//! Each test triggers a run through the launcher and checks the final run
//! document, the task logs and what the query service saw.

use dagrun::testing::ScriptedQueryService;
use dagrun::{
    BlobStore, DagBuilder, DagId, InMemoryBlobStore, Launcher, RunStatus, SchedulerError, TaskId,
    TaskStatus,
};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{catalog, collect_snapshots, fast_monitor, wait_for_run_status};

fn launcher_with(
    dags: Vec<dagrun::Dag>,
    service: Arc<ScriptedQueryService>,
) -> (Launcher, Arc<InMemoryBlobStore>) {
    let store = Arc::new(InMemoryBlobStore::new());
    let launcher = Launcher::new(catalog(dags), store.clone(), service)
        .with_monitor_config(fast_monitor());
    (launcher, store)
}

#[tokio::test]
async fn test_single_task_success_writes_log_with_row_count() {
    let dag = DagBuilder::new("single")
        .add_task("count_orders", "SELECT count(*) FROM orders")
        .build()
        .unwrap();
    let service = Arc::new(ScriptedQueryService::new().succeed("SELECT count(*) FROM orders", 5));
    let (launcher, _) = launcher_with(vec![dag], service);
    let dag_id = DagId::new("single");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    let run = wait_for_run_status(
        &launcher,
        &dag_id,
        &run_id,
        RunStatus::Success,
        Duration::from_secs(5),
    )
    .await;

    assert!(run.end_time.is_some());
    let instance = run.instance(&TaskId::new("count_orders")).unwrap();
    assert_eq!(instance.status, TaskStatus::Success);
    assert!(instance.start_time.is_some() && instance.end_time.is_some());

    let log = launcher
        .get_task_log(&dag_id, &run_id, &TaskId::new("count_orders"))
        .await
        .unwrap();
    assert!(log.contains('5'));
    assert!(log.contains("completed successfully"));

    assert_eq!(launcher.wait(&run_id).await.unwrap(), RunStatus::Success);
}

#[tokio::test]
async fn test_failed_upstream_fails_run_and_never_dispatches_downstream() {
    let dag = DagBuilder::new("chain")
        .add_task("x", "SELECT broken")
        .add_task_with_deps("y", "SELECT after_x", &["x"])
        .build()
        .unwrap();
    let service = Arc::new(ScriptedQueryService::new().fail("SELECT broken", "column does not exist"));
    let (launcher, _) = launcher_with(vec![dag], Arc::clone(&service));
    let dag_id = DagId::new("chain");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    assert_eq!(launcher.wait(&run_id).await.unwrap(), RunStatus::Failed);

    let run = launcher.get_run(&dag_id, &run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.end_time.is_some());
    assert_eq!(run.instance(&TaskId::new("x")).unwrap().status, TaskStatus::Failed);
    assert_eq!(run.instance(&TaskId::new("y")).unwrap().status, TaskStatus::Queued);
    assert!(!service.was_called("SELECT after_x"));

    let log = launcher
        .get_task_log(&dag_id, &run_id, &TaskId::new("x"))
        .await
        .unwrap();
    assert_eq!(log, "Task x failed.\nError: column does not exist");

    assert!(matches!(
        launcher.get_task_log(&dag_id, &run_id, &TaskId::new("y")).await,
        Err(SchedulerError::LogNotFound { .. })
    ));
}

#[tokio::test]
async fn test_worker_pool_limits_running_tasks() {
    let dag = DagBuilder::new("fanout")
        .add_task("a", "qa")
        .add_task("b", "qb")
        .add_task("c", "qc")
        .build()
        .unwrap();
    let service = Arc::new(ScriptedQueryService::new().default_delay(Duration::from_millis(60)));
    let store = Arc::new(InMemoryBlobStore::new());
    let launcher = Launcher::new(catalog(vec![dag]), store, Arc::clone(&service) as Arc<dyn dagrun::QueryService>)
        .with_monitor_config(fast_monitor().with_max_parallel_tasks(2));
    let dag_id = DagId::new("fanout");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    let snapshots = collect_snapshots(&launcher, &dag_id, &run_id, Duration::from_secs(5)).await;

    assert_eq!(snapshots.last().unwrap().status, RunStatus::Success);
    for snapshot in &snapshots {
        assert!(snapshot.count(TaskStatus::Running) <= 2);
    }
    assert!(service.max_concurrency() <= 2);
    assert_eq!(service.call_count(), 3);
    launcher.wait(&run_id).await.unwrap();
}

#[tokio::test]
async fn test_unknown_dag_creates_no_run_document() {
    let dag = DagBuilder::new("known").add_task("t", "q").build().unwrap();
    let (launcher, store) = launcher_with(vec![dag], Arc::new(ScriptedQueryService::new()));

    let err = launcher.trigger(&DagId::new("unknown")).await.unwrap_err();

    assert!(matches!(err, SchedulerError::DagNotFound(ref id) if id.as_str() == "unknown"));
    assert!(store.is_empty());
    assert!(store.list("").await.unwrap().is_empty());
    assert!(launcher.active_runs().await.is_empty());
}

#[tokio::test]
async fn test_independent_tasks_succeed_in_any_completion_order() {
    for (slow, fast) in [("qa", "qb"), ("qb", "qa")] {
        let dag = DagBuilder::new("pair")
            .add_task("a", "qa")
            .add_task("b", "qb")
            .build()
            .unwrap();
        let service = Arc::new(
            ScriptedQueryService::new()
                .delay(slow, Duration::from_millis(50))
                .delay(fast, Duration::from_millis(1)),
        );
        let (launcher, _) = launcher_with(vec![dag], service);
        let dag_id = DagId::new("pair");

        let run_id = launcher.trigger(&dag_id).await.unwrap();

        assert_eq!(launcher.wait(&run_id).await.unwrap(), RunStatus::Success);
        let run = launcher.get_run(&dag_id, &run_id).await.unwrap();
        assert!(run.all_succeeded());
    }
}

#[tokio::test]
async fn test_diamond_respects_dependencies_in_every_snapshot() {
    let dag = DagBuilder::new("diamond")
        .add_task("root", "q_root")
        .add_task_with_deps("left", "q_left", &["root"])
        .add_task_with_deps("right", "q_right", &["root"])
        .add_task_with_deps("join", "q_join", &["left", "right"])
        .build()
        .unwrap();
    let service = Arc::new(ScriptedQueryService::new().default_delay(Duration::from_millis(15)));
    let (launcher, _) = launcher_with(vec![dag], Arc::clone(&service));
    let dag_id = DagId::new("diamond");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    let snapshots = collect_snapshots(&launcher, &dag_id, &run_id, Duration::from_secs(5)).await;

    for snapshot in &snapshots {
        for instance in &snapshot.task_instances {
            if instance.status != TaskStatus::Queued {
                assert!(
                    snapshot.dependencies_met(instance),
                    "{} left QUEUED before its dependencies succeeded",
                    instance.task_id
                );
            }
        }
    }

    let calls = service.calls();
    assert_eq!(calls.first().map(String::as_str), Some("q_root"));
    assert_eq!(calls.last().map(String::as_str), Some("q_join"));
    assert_eq!(snapshots.last().unwrap().status, RunStatus::Success);
    launcher.wait(&run_id).await.unwrap();
}

#[tokio::test]
async fn test_instances_only_move_forward_through_lifecycle() {
    let dag = DagBuilder::new("lifecycle")
        .add_task("a", "qa")
        .add_task_with_deps("b", "qb", &["a"])
        .add_task("c", "qc")
        .build()
        .unwrap();
    let service = Arc::new(
        ScriptedQueryService::new()
            .default_delay(Duration::from_millis(10))
            .fail("qc", "boom"),
    );
    let (launcher, _) = launcher_with(vec![dag], service);
    let dag_id = DagId::new("lifecycle");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    let snapshots = collect_snapshots(&launcher, &dag_id, &run_id, Duration::from_secs(5)).await;

    let rank = |status: TaskStatus| match status {
        TaskStatus::Queued => 0,
        TaskStatus::Pending => 1,
        TaskStatus::Running => 2,
        TaskStatus::Success | TaskStatus::Failed => 3,
    };

    for pair in snapshots.windows(2) {
        for (before, after) in pair[0].task_instances.iter().zip(&pair[1].task_instances) {
            assert_eq!(before.task_id, after.task_id);
            assert!(rank(after.status) >= rank(before.status));
            if before.status.is_terminal() {
                assert_eq!(before.status, after.status);
            }
        }
    }
    assert_eq!(snapshots.last().unwrap().status, RunStatus::Failed);
    launcher.wait(&run_id).await.unwrap();
}

#[tokio::test]
async fn test_service_panic_is_recorded_as_failure() {
    let dag = DagBuilder::new("crashy")
        .add_task("explode", "SELECT crash()")
        .build()
        .unwrap();
    let service = Arc::new(ScriptedQueryService::new().panic("SELECT crash()", "connection reset by peer"));
    let (launcher, _) = launcher_with(vec![dag], service);
    let dag_id = DagId::new("crashy");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    assert_eq!(launcher.wait(&run_id).await.unwrap(), RunStatus::Failed);

    let log = launcher
        .get_task_log(&dag_id, &run_id, &TaskId::new("explode"))
        .await
        .unwrap();
    assert!(log.starts_with("Task explode failed with unhandled exception: "));
    assert!(log.contains("connection reset by peer"));
}

#[tokio::test]
async fn test_sibling_in_flight_when_run_fails_is_abandoned() {
    let dag = DagBuilder::new("siblings")
        .add_task("fails_fast", "q_fail")
        .add_task("slow", "q_slow")
        .build()
        .unwrap();
    let service = Arc::new(
        ScriptedQueryService::new()
            .fail("q_fail", "nope")
            .succeed("q_slow", 9)
            .delay("q_slow", Duration::from_millis(150)),
    );
    let (launcher, _) = launcher_with(vec![dag], service);
    let dag_id = DagId::new("siblings");

    let run_id = launcher.trigger(&dag_id).await.unwrap();
    assert_eq!(launcher.wait(&run_id).await.unwrap(), RunStatus::Failed);

    // the monitor drains its pool, so the slow task has finished by now
    let run = launcher.get_run(&dag_id, &run_id).await.unwrap();
    let slow = run.instance(&TaskId::new("slow")).unwrap();
    assert_ne!(slow.status, TaskStatus::Success);
    assert!(slow.end_time.is_none());

    let log = launcher
        .get_task_log(&dag_id, &run_id, &TaskId::new("slow"))
        .await
        .unwrap();
    assert!(log.contains("Rows affected/processed: 9"));
}

#[tokio::test]
async fn test_runs_are_listed_most_recent_first() {
    let dag = DagBuilder::new("repeat").add_task("t", "q").build().unwrap();
    let (launcher, _) = launcher_with(vec![dag], Arc::new(ScriptedQueryService::new()));
    let dag_id = DagId::new("repeat");

    let mut triggered = Vec::new();
    for _ in 0..3 {
        let run_id = launcher.trigger(&dag_id).await.unwrap();
        launcher.wait(&run_id).await.unwrap();
        triggered.push(run_id);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let listed: Vec<_> = launcher
        .list_runs(&dag_id)
        .await
        .unwrap()
        .into_iter()
        .map(|summary| summary.run_id)
        .collect();
    triggered.reverse();
    assert_eq!(listed, triggered);

    let latest = launcher.latest_run(&dag_id).await.unwrap().unwrap();
    assert_eq!(latest.run_id, triggered[0]);
}

#[tokio::test]
async fn test_concurrent_runs_of_same_dag_are_independent() {
    let dag = DagBuilder::new("parallel_runs")
        .add_task("a", "qa")
        .add_task_with_deps("b", "qb", &["a"])
        .build()
        .unwrap();
    let service = Arc::new(ScriptedQueryService::new().default_delay(Duration::from_millis(10)));
    let (launcher, _) = launcher_with(vec![dag], Arc::clone(&service));
    let dag_id = DagId::new("parallel_runs");

    let first = launcher.trigger(&dag_id).await.unwrap();
    let second = launcher.trigger(&dag_id).await.unwrap();
    assert_eq!(launcher.active_runs().await.len(), 2);

    launcher.shutdown().await;

    for run_id in [&first, &second] {
        let run = launcher.get_run(&dag_id, run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
    }
    assert_eq!(service.call_count(), 4);
    assert!(launcher.active_runs().await.is_empty());
}
