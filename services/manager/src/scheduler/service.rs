//! Manager side of the protocol.
//!
//! Inbound messages and the periodic tick both act on one
//! [`GridScheduler`] behind a write lock. Ledger writes and outbound sends
//! happen after the lock is released.

use std::sync::Arc;
use std::time::Duration;

use ankadepth_proto::{
    DepthConfig, Message, RunnerState, TaskId, TerminalCommand, WorkerId, WorkerPayload, VERSION,
};
use chrono::{DateTime, Local, Utc};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::grid::{GridScheduler, GridStatus};
use crate::console::Console;
use crate::ledger::TaskLedger;
use crate::schedule;

/// Why [`ManagerService::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every task has an outcome.
    Completed,
    /// Shutdown was signalled.
    Shutdown,
    /// The supervisor closed the input.
    InputClosed,
}

struct GridState {
    grid: GridScheduler,
    /// Toggled by the `start` and `stop` console commands.
    started: bool,
}

/// Drives the grid from protocol messages and the scheduling tick.
pub struct ManagerService {
    depth: Arc<DepthConfig>,
    ledger: TaskLedger,
    state: RwLock<GridState>,
    last_status: Mutex<String>,
    console: Console,
    tick_interval: Duration,
}

impl ManagerService {
    pub fn new(
        depth: DepthConfig,
        grid: GridScheduler,
        ledger: TaskLedger,
        console: Console,
        tick_interval: Duration,
    ) -> Self {
        let started = depth.manager_auto_start;
        Self {
            depth: Arc::new(depth),
            ledger,
            state: RwLock::new(GridState { grid, started }),
            last_status: Mutex::new(String::new()),
            console,
            tick_interval,
        }
    }

    /// Process inbound messages and tick until every task has an outcome,
    /// the input ends or shutdown is signalled.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<Message>,
        mut shutdown: watch::Receiver<bool>,
    ) -> StopReason {
        info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            "Starting grid scheduler"
        );

        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let reason = loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else {
                        info!("Input closed");
                        break StopReason::InputClosed;
                    };
                    self.handle_message(message).await;
                }
                _ = tick.tick() => {
                    if self.tick(Local::now()).await {
                        break StopReason::Completed;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Grid scheduler shutting down");
                        break StopReason::Shutdown;
                    }
                }
            }
        };

        self.console.warning("Process is exiting...").await;
        reason
    }

    /// Dispatch one inbound message.
    pub async fn handle_message(&self, message: Message) {
        match message {
            Message::WorkerJoin {
                worker_id,
                capacity,
            } => self.worker_in(worker_id, capacity).await,
            Message::WorkerLeave { worker_id }
            | Message::WorkerExit {
                worker_id: Some(worker_id),
            } => self.worker_out(&worker_id).await,
            Message::WorkerData {
                worker_id: Some(worker_id),
                payload: WorkerPayload::TaskResult { state, task_id },
            } => self.task_result(&worker_id, task_id, state).await,
            Message::WorkerData { .. } => {
                self.console.error("Unexpected task arguments.").await;
            }
            Message::Terminal(command) => self.terminal(command).await,
            other => {
                let tag = other.to_frame().tag;
                warn!(%tag, "Ignoring message not meant for the manager");
            }
        }
    }

    async fn worker_in(&self, worker_id: WorkerId, capacity: usize) {
        let registered = self
            .state
            .write()
            .await
            .grid
            .register_worker(worker_id.clone(), capacity);

        if let Err(e) = registered {
            self.console
                .error(format!("Worker: {worker_id} couldn't join the compute-grid: {e}"))
                .await;
            return;
        }

        self.console
            .send(Message::WorkerData {
                worker_id: Some(worker_id.clone()),
                payload: WorkerPayload::TaskConfig((*self.depth).clone()),
            })
            .await;
        self.console
            .warning(format!(
                "Worker: {worker_id} has joined to the compute-grid with {capacity} parallel computing capacity."
            ))
            .await;
    }

    async fn worker_out(&self, worker_id: &WorkerId) {
        let removed = self.state.write().await.grid.unregister_worker(worker_id);
        match removed {
            Ok(requeued) => {
                debug!(worker_id = %worker_id, requeued = requeued.len(), "Requeued assignments");
                self.console
                    .warning(format!("Worker: {worker_id} is out of grid."))
                    .await;
            }
            Err(e) => warn!(error = %e, "Ignoring departure"),
        }
    }

    async fn task_result(&self, worker_id: &WorkerId, task_id: TaskId, state: RunnerState) {
        let reported = self
            .state
            .write()
            .await
            .grid
            .report_result(worker_id, task_id, state);

        let outcome = match reported {
            Ok(outcome) => outcome,
            // Also a late result for a task that timed out and moved on.
            Err(e) => {
                warn!(error = %e, "Ignoring result");
                return;
            }
        };

        debug!(worker_id = %worker_id, task_id = %task_id, ?outcome, "Task settled");
        if let Err(e) = self.ledger.append(outcome, task_id).await {
            self.console.error(e.to_string()).await;
        }
    }

    async fn terminal(&self, command: TerminalCommand) {
        match command {
            TerminalCommand::Start => self.set_started(true).await,
            TerminalCommand::Stop => self.set_started(false).await,
            TerminalCommand::Tasks => {
                let assignments = self.state.read().await.grid.assignments();
                for (worker_id, task_id) in assignments {
                    self.console
                        .info(format!("* Worker: {worker_id} Task Id: {task_id}"))
                        .await;
                }
            }
            TerminalCommand::DropWorker(worker_id) => self.worker_out(&worker_id).await,
            TerminalCommand::SysWorkers(command) => {
                let workers = self.state.read().await.grid.worker_ids();
                for worker_id in workers {
                    self.sys_call(worker_id, command.clone()).await;
                }
            }
            TerminalCommand::SysWorker(worker_id, command) => {
                self.sys_call(worker_id, command).await;
            }
            TerminalCommand::Unknown(text) => {
                self.console
                    .error(format!("Unknown terminal command: {text}"))
                    .await;
            }
        }
    }

    async fn set_started(&self, started: bool) {
        self.state.write().await.started = started;
        info!(started, "Scheduling toggled");
    }

    async fn sys_call(&self, worker_id: WorkerId, command: String) {
        self.console
            .send(Message::WorkerData {
                worker_id: Some(worker_id),
                payload: WorkerPayload::SysCall(command),
            })
            .await;
    }

    /// One scheduling pass at local time `now`. Returns true once every task
    /// has an outcome.
    ///
    /// Nothing is scheduled unless the grid is started, has a worker and the
    /// work schedule permits `now`.
    pub async fn tick(&self, now: DateTime<Local>) -> bool {
        let report = {
            let mut state = self.state.write().await;
            let running = state.started
                && state.grid.has_workers()
                && schedule::permits(&self.depth.schedule, now.naive_local());
            running.then(|| state.grid.tick(now.with_timezone(&Utc)))
        };

        let running = report.is_some();
        let mut finished = false;
        if let Some(report) = report {
            for (worker_id, task_id) in report.requeued {
                self.console
                    .warning(format!(
                        "Region ID: {task_id} => Execution timed out on worker: {worker_id}. Task requeued."
                    ))
                    .await;
            }
            for (worker_id, task) in report.assigned {
                debug!(worker_id = %worker_id, task_id = %task.id, "Assigned task");
                self.console
                    .send(Message::WorkerData {
                        worker_id: Some(worker_id),
                        payload: WorkerPayload::TaskExecute(task),
                    })
                    .await;
            }
            if report.finished {
                self.console.warning("All tasks are completed.").await;
                finished = true;
            }
        }

        self.publish_status(running).await;
        finished
    }

    pub async fn status(&self) -> GridStatus {
        self.state.read().await.grid.status()
    }

    pub async fn is_started(&self) -> bool {
        self.state.read().await.started
    }

    /// The status line for the given run state.
    pub async fn status_line(&self, running: bool) -> String {
        let status = self.status().await;
        format!(
            "Anka-Depth v{VERSION} - Status: {}, Completed: {}, Failed: {}, Total: {}, Workers: {}, Progress: {:.2}%",
            if running { "Running" } else { "Waiting" },
            status.completed,
            status.failed,
            status.total,
            status.workers,
            status.progress()
        )
    }

    /// Emit the status line if it changed since the last one.
    async fn publish_status(&self, running: bool) {
        let status = self.status_line(running).await;
        let mut last = self.last_status.lock().await;
        if *last != status {
            last.clone_from(&status);
            drop(last);
            self.console.send(Message::Status(status)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Outcome;
    use crate::testing::regions;
    use ankadepth_proto::{LogLevel, Task, WorkSchedule};
    use chrono::{NaiveDate, TimeZone};

    struct Harness {
        service: ManagerService,
        outbound: mpsc::Receiver<Message>,
        ledger: TaskLedger,
        _dir: tempfile::TempDir,
    }

    fn harness_with(depth: DepthConfig, tasks: Vec<Task>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TaskLedger::new(dir.path().join("completed.txt"), dir.path().join("failed.txt"));
        let (tx, outbound) = mpsc::channel(256);
        let service = ManagerService::new(
            depth,
            GridScheduler::new(tasks, Duration::from_secs(600)),
            ledger.clone(),
            Console::new(tx),
            Duration::from_millis(5),
        );
        Harness {
            service,
            outbound,
            ledger,
            _dir: dir,
        }
    }

    fn harness(count: i64) -> Harness {
        let depth = DepthConfig {
            manager_auto_start: true,
            input_root_dirs: vec!["2019_06_12".to_string()],
            ..DepthConfig::default()
        };
        harness_with(depth, regions(count))
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    fn logs(messages: &[Message]) -> Vec<(LogLevel, String)> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::Log { level, text, .. } => Some((*level, text.clone())),
                _ => None,
            })
            .collect()
    }

    fn executes(messages: &[Message]) -> Vec<(String, i64)> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::WorkerData {
                    worker_id: Some(w),
                    payload: WorkerPayload::TaskExecute(task),
                } => Some((w.to_string(), task.id.get())),
                _ => None,
            })
            .collect()
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

    fn result(name: &str, id: i64, state: RunnerState) -> Message {
        Message::WorkerData {
            worker_id: Some(worker(name)),
            payload: WorkerPayload::TaskResult {
                state,
                task_id: TaskId::new(id),
            },
        }
    }

    fn terminal(words: &str) -> Message {
        Message::Terminal(TerminalCommand::parse(&[words.to_string()]).unwrap())
    }

    #[tokio::test]
    async fn test_join_sends_config() {
        let mut h = harness(3);

        h.service.handle_message(join("w1", 2)).await;

        let out = drain(&mut h.outbound);
        assert!(matches!(
            &out[0],
            Message::WorkerData {
                worker_id: Some(w),
                payload: WorkerPayload::TaskConfig(config),
            } if w.as_str() == "w1" && config.input_root_dirs == vec!["2019_06_12".to_string()]
        ));
        assert_eq!(
            logs(&out),
            vec![(
                LogLevel::Warning,
                "Worker: w1 has joined to the compute-grid with 2 parallel computing capacity."
                    .to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_duplicate_join_is_rejected() {
        let mut h = harness(3);
        h.service.handle_message(join("w1", 2)).await;
        drain(&mut h.outbound);

        h.service.handle_message(join("w1", 4)).await;

        let out = drain(&mut h.outbound);
        assert_eq!(out.len(), 1);
        assert_eq!(logs(&out)[0].0, LogLevel::Error);
        assert_eq!(h.service.status().await.workers, 1);
    }

    #[tokio::test]
    async fn test_tick_assigns_and_reports_status() {
        let mut h = harness(5);
        h.service.handle_message(join("w1", 2)).await;
        drain(&mut h.outbound);

        assert!(!h.service.tick(Local::now()).await);

        let out = drain(&mut h.outbound);
        assert_eq!(executes(&out), vec![("w1".to_string(), 1), ("w1".to_string(), 2)]);
        assert_eq!(
            out.last(),
            Some(&Message::Status(format!(
                "Anka-Depth v{VERSION} - Status: Running, Completed: 0, Failed: 0, Total: 5, Workers: 1, Progress: 0.00%"
            )))
        );

        // Unchanged status is not repeated.
        h.service.tick(Local::now()).await;
        assert!(drain(&mut h.outbound).is_empty());
    }

    #[tokio::test]
    async fn test_waiting_without_workers_or_start() {
        let mut h = harness(2);
        h.service.handle_message(terminal("stop")).await;
        h.service.handle_message(join("w1", 1)).await;
        drain(&mut h.outbound);

        h.service.tick(Local::now()).await;

        let out = drain(&mut h.outbound);
        assert!(executes(&out).is_empty());
        assert!(matches!(&out[0], Message::Status(s) if s.contains("Status: Waiting")));

        h.service.handle_message(terminal("start")).await;
        h.service.tick(Local::now()).await;
        assert_eq!(executes(&drain(&mut h.outbound)).len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_gates_ticks() {
        let depth = DepthConfig {
            manager_auto_start: true,
            schedule: WorkSchedule {
                enabled: true,
                start: chrono::NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
                stop: chrono::NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
                ..WorkSchedule::default()
            },
            ..DepthConfig::default()
        };
        let mut h = harness_with(depth, regions(2));
        h.service.handle_message(join("w1", 1)).await;
        drain(&mut h.outbound);

        // Wednesday noon: outside the window.
        let noon = Local
            .from_local_datetime(&NaiveDate::from_ymd_opt(2019, 6, 12).unwrap().and_hms_opt(12, 0, 0).unwrap())
            .earliest()
            .unwrap();
        h.service.tick(noon).await;
        assert!(executes(&drain(&mut h.outbound)).is_empty());

        let night = noon + chrono::TimeDelta::hours(11);
        h.service.tick(night).await;
        assert_eq!(executes(&drain(&mut h.outbound)).len(), 1);
    }

    #[tokio::test]
    async fn test_results_are_counted_and_logged() {
        let mut h = harness(2);
        h.service.handle_message(join("w1", 2)).await;
        h.service.tick(Local::now()).await;

        h.service.handle_message(result("w1", 1, RunnerState::Completed)).await;
        h.service.handle_message(result("w1", 2, RunnerState::ErrorState)).await;
        // Duplicate report for a settled task is ignored.
        h.service.handle_message(result("w1", 2, RunnerState::Completed)).await;

        let status = h.service.status().await;
        assert_eq!((status.completed, status.failed), (1, 1));
        assert_eq!(h.ledger.restore(Outcome::Completed).await.unwrap().count, 1);
        assert_eq!(h.ledger.restore(Outcome::Failed).await.unwrap().count, 1);

        drain(&mut h.outbound);
        assert!(h.service.tick(Local::now()).await);
        let out = drain(&mut h.outbound);
        assert!(logs(&out).contains(&(LogLevel::Warning, "All tasks are completed.".to_string())));
        assert!(matches!(out.last(), Some(Message::Status(s)) if s.ends_with("Progress: 100.00%")));
    }

    #[tokio::test]
    async fn test_worker_leave_requeues() {
        let mut h = harness(4);
        h.service.handle_message(join("w1", 2)).await;
        h.service.tick(Local::now()).await;

        h.service
            .handle_message(Message::WorkerExit {
                worker_id: Some(worker("w1")),
            })
            .await;

        let status = h.service.status().await;
        assert_eq!((status.workers, status.backlog, status.in_flight), (0, 4, 0));
        let out = drain(&mut h.outbound);
        assert!(logs(&out).contains(&(LogLevel::Warning, "Worker: w1 is out of grid.".to_string())));
    }

    #[tokio::test]
    async fn test_timeout_is_logged_and_reassigned() {
        let mut h = harness(1);
        h.service.handle_message(join("w1", 1)).await;
        let start = Local::now();
        h.service.tick(start).await;
        drain(&mut h.outbound);

        h.service.tick(start + chrono::TimeDelta::seconds(600)).await;

        let out = drain(&mut h.outbound);
        assert!(logs(&out).contains(&(
            LogLevel::Warning,
            "Region ID: 1 => Execution timed out on worker: w1. Task requeued.".to_string()
        )));
        assert_eq!(executes(&out), vec![("w1".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_terminal_commands() {
        let mut h = harness(3);
        h.service.handle_message(join("w1", 1)).await;
        h.service.handle_message(join("w2", 1)).await;
        h.service.tick(Local::now()).await;
        drain(&mut h.outbound);

        h.service.handle_message(terminal("tasks")).await;
        let listed = logs(&drain(&mut h.outbound));
        assert_eq!(
            listed,
            vec![
                (LogLevel::Info, "* Worker: w1 Task Id: 1".to_string()),
                (LogLevel::Info, "* Worker: w2 Task Id: 2".to_string()),
            ]
        );

        h.service.handle_message(terminal("sysworkers df -h")).await;
        let calls: Vec<String> = drain(&mut h.outbound)
            .into_iter()
            .filter_map(|m| match m {
                Message::WorkerData {
                    worker_id: Some(w),
                    payload: WorkerPayload::SysCall(cmd),
                } => Some(format!("{w}:{cmd}")),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec!["w1:df -h", "w2:df -h"]);

        h.service.handle_message(terminal("sysworker w2 uptime")).await;
        assert!(matches!(
            drain(&mut h.outbound).as_slice(),
            [Message::WorkerData { worker_id: Some(w), payload: WorkerPayload::SysCall(cmd) }]
                if w.as_str() == "w2" && cmd == "uptime"
        ));

        h.service.handle_message(terminal("dropworker w1")).await;
        assert_eq!(h.service.status().await.workers, 1);
        assert_eq!(h.service.status().await.backlog, 2);
        assert_eq!(
            logs(&drain(&mut h.outbound)),
            vec![(LogLevel::Warning, "Worker: w1 is out of grid.".to_string())]
        );

        h.service.handle_message(terminal("reboot")).await;
        assert_eq!(
            logs(&drain(&mut h.outbound)),
            vec![(LogLevel::Error, "Unknown terminal command: reboot".to_string())]
        );
        assert!(h.service.is_started().await);
    }

    #[tokio::test]
    async fn test_unexpected_worker_data() {
        let mut h = harness(1);
        h.service
            .handle_message(Message::WorkerData {
                worker_id: Some(worker("w1")),
                payload: WorkerPayload::SysCall("ls".to_string()),
            })
            .await;
        assert_eq!(
            logs(&drain(&mut h.outbound)),
            vec![(LogLevel::Error, "Unexpected task arguments.".to_string())]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_completion() {
        let h = harness(0);
        let (in_tx, in_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        in_tx.send(join("w1", 1)).await.unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(5), h.service.run(in_rx, shutdown_rx))
            .await
            .unwrap();

        assert_eq!(reason, StopReason::Completed);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(3);
        let (_in_tx, in_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(5), h.service.run(in_rx, shutdown_rx))
            .await
            .unwrap();

        assert_eq!(reason, StopReason::Shutdown);
    }
}
