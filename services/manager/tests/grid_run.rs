//! End-to-end tests for the manager against simulated workers.
//!
//! A supervisor stand-in feeds the service joins and results over the
//! inbound channel and answers every TASK_EXECUTE it sees on the outbound
//! one, until the job reports completion.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ankadepth_manager::testing::regions;
use ankadepth_manager::{
    load_backlog, Console, ManagerService, MockRegionSource, Outcome, StopReason, TaskLedger,
};
use ankadepth_proto::{DepthConfig, Message, RunnerState, TaskId, WorkerId, WorkerPayload};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

const TIMEOUT: Duration = Duration::from_secs(600);

struct Grid {
    temp_dir: TempDir,
    ledger: TaskLedger,
    depth: DepthConfig,
}

fn create_test_grid() -> Grid {
    let temp_dir = TempDir::new().unwrap();
    let ledger = TaskLedger::new(
        temp_dir.path().join("completed.txt"),
        temp_dir.path().join("failed.txt"),
    );
    let depth = DepthConfig {
        manager_auto_start: true,
        input_root_dirs: vec!["2019_06_12".to_string()],
        ..DepthConfig::default()
    };
    Grid {
        temp_dir,
        ledger,
        depth,
    }
}

fn worker(name: &str) -> WorkerId {
    WorkerId::parse(name).unwrap()
}

fn join(name: &str, capacity: usize) -> Message {
    Message::WorkerJoin {
        worker_id: worker(name),
        capacity,
    }
}

/// Run the service until it stops, answering assignments as they arrive.
/// Tasks whose id `fails` accepts are reported as ErrorState. Returns the
/// stop reason and every assignment seen.
async fn run_grid(
    grid: &Grid,
    tasks: usize,
    joins: Vec<Message>,
    fails: impl Fn(TaskId) -> bool,
) -> (StopReason, Vec<(WorkerId, TaskId)>) {
    let (out_tx, mut outbound) = mpsc::channel(1024);
    let console = Console::new(out_tx);
    let source = MockRegionSource::new(regions(tasks as i64));
    let backlog = load_backlog(&grid.depth, &source, &grid.ledger, TIMEOUT, &console)
        .await
        .unwrap();

    let service = Arc::new(ManagerService::new(
        grid.depth.clone(),
        backlog,
        grid.ledger.clone(),
        console,
        Duration::from_millis(2),
    ));
    let (in_tx, in_rx) = mpsc::channel(1024);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    for message in joins {
        in_tx.send(message).await.unwrap();
    }

    let runner = Arc::clone(&service);
    let mut handle = tokio::spawn(async move { runner.run(in_rx, shutdown_rx).await });

    let mut assigned = Vec::new();
    let reason = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            tokio::select! {
                reason = &mut handle => return reason.unwrap(),
                Some(message) = outbound.recv() => {
                    if let Message::WorkerData {
                        worker_id: Some(worker_id),
                        payload: WorkerPayload::TaskExecute(task),
                    } = message
                    {
                        assigned.push((worker_id.clone(), task.id));
                        let state = if fails(task.id) {
                            RunnerState::ErrorState
                        } else {
                            RunnerState::Completed
                        };
                        in_tx
                            .send(Message::WorkerData {
                                worker_id: Some(worker_id),
                                payload: WorkerPayload::TaskResult {
                                    state,
                                    task_id: task.id,
                                },
                            })
                            .await
                            .unwrap();
                    }
                }
            }
        }
    })
    .await
    .expect("job did not finish");

    (reason, assigned)
}

fn ids(restored: &HashSet<TaskId>) -> Vec<i64> {
    let mut ids: Vec<i64> = restored.iter().map(|id| id.get()).collect();
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_job_runs_to_completion() {
    let grid = create_test_grid();

    let (reason, assigned) = run_grid(
        &grid,
        40,
        vec![join("node-1", 3), join("node-2", 5)],
        |id| id.get() % 10 == 0,
    )
    .await;

    assert_eq!(reason, StopReason::Completed);
    assert_eq!(assigned.len(), 40);
    let distinct: HashSet<TaskId> = assigned.iter().map(|(_, id)| *id).collect();
    assert_eq!(distinct.len(), 40);
    assert!(assigned.iter().any(|(w, _)| w.as_str() == "node-1"));
    assert!(assigned.iter().any(|(w, _)| w.as_str() == "node-2"));

    let completed = grid.ledger.restore(Outcome::Completed).await.unwrap();
    let failed = grid.ledger.restore(Outcome::Failed).await.unwrap();
    assert_eq!(completed.count, 36);
    assert_eq!(ids(&failed.ids), vec![10, 20, 30, 40]);
}

#[tokio::test]
async fn test_restart_skips_recorded_regions() {
    let grid = create_test_grid();
    std::fs::write(grid.temp_dir.path().join("completed.txt"), "1\n2\n3\n").unwrap();
    std::fs::write(grid.temp_dir.path().join("failed.txt"), "4\n").unwrap();

    let (reason, assigned) = run_grid(&grid, 8, vec![join("node-1", 2)], |_| false).await;

    assert_eq!(reason, StopReason::Completed);
    let mut executed: Vec<i64> = assigned.iter().map(|(_, id)| id.get()).collect();
    executed.sort_unstable();
    assert_eq!(executed, vec![5, 6, 7, 8]);

    let completed = grid.ledger.restore(Outcome::Completed).await.unwrap();
    assert_eq!(ids(&completed.ids), vec![1, 2, 3, 5, 6, 7, 8]);
}

#[tokio::test]
async fn test_departed_worker_tasks_are_redone() {
    let grid = create_test_grid();

    // node-1 joins, takes work and leaves before reporting anything; its
    // tasks go back to the front and node-2 finishes the job.
    let (reason, assigned) = run_grid(
        &grid,
        6,
        vec![
            join("node-1", 2),
            Message::WorkerLeave {
                worker_id: worker("node-1"),
            },
            join("node-2", 2),
        ],
        |_| false,
    )
    .await;

    assert_eq!(reason, StopReason::Completed);
    let by_node_2: HashSet<TaskId> = assigned
        .iter()
        .filter(|(w, _)| w.as_str() == "node-2")
        .map(|(_, id)| *id)
        .collect();
    assert_eq!(by_node_2.len(), 6);
    assert_eq!(grid.ledger.restore(Outcome::Completed).await.unwrap().count, 6);
}
