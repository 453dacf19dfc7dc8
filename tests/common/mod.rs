//! Common test utilities shared across integration tests.

use dagrun::{Dag, DagCatalog, DagId, Launcher, MonitorConfig, RunId, RunState, RunStatus};
use std::time::Duration;

/// Monitor settings with a short poll interval so tests finish quickly.
pub fn fast_monitor() -> MonitorConfig {
    MonitorConfig::default().with_poll_interval(Duration::from_millis(5))
}

/// Build a catalog from DAGs, panicking on duplicates.
pub fn catalog(dags: impl IntoIterator<Item = Dag>) -> DagCatalog {
    DagCatalog::from_dags(dags).expect("duplicate dag in test catalog")
}

/// Wait for a run to reach an expected status, polling the run document.
///
/// This is more reliable than fixed sleeps since execution time can vary.
/// Polls every 10ms and times out after the specified duration.
///
/// # Panics
///
/// Panics if the timeout is reached before the run reaches the expected status.
pub async fn wait_for_run_status(
    launcher: &Launcher,
    dag_id: &DagId,
    run_id: &RunId,
    expected: RunStatus,
    timeout: Duration,
) -> RunState {
    let start = tokio::time::Instant::now();
    loop {
        let run = launcher.get_run(dag_id, run_id).await.unwrap();
        if run.status == expected {
            return run;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for run {} to reach {}, current status: {}",
                run_id, expected, run.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll a run until it is terminal, returning every distinct snapshot seen.
pub async fn collect_snapshots(
    launcher: &Launcher,
    dag_id: &DagId,
    run_id: &RunId,
    timeout: Duration,
) -> Vec<RunState> {
    let start = tokio::time::Instant::now();
    let mut snapshots: Vec<RunState> = Vec::new();
    loop {
        let run = launcher.get_run(dag_id, run_id).await.unwrap();
        let terminal = run.status.is_terminal();
        if snapshots.last() != Some(&run) {
            snapshots.push(run);
        }
        if terminal {
            return snapshots;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for run {} to finish", run_id);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
