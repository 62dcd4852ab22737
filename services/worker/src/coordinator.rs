//! Worker coordination: the runner pool, protocol dispatch and reporting.
//!
//! The coordinator keeps every runner it was handed in a pool. Idle runners
//! are submitted to a semaphore-bounded execution pool; finished runners are
//! reported upstream with TASK_RESULT and removed.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ankadepth_proto::{
    DepthConfig, LogLevel, LogSource, Message, RunnerState, Task, TaskId, WorkerId,
    WorkerPayload, VERSION,
};
use ankadepth_reconstruct::ReconstructionEngine;
use tokio::sync::{mpsc, watch, Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::cache::PatchCache;
use crate::runner::{RunnerContext, RunnerEvent, RunnerId, TaskRunner};
use crate::store::{PatchSource, PatchSourceFactory};

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Announced with WORKER_JOIN / WORKER_LEAVE when set.
    pub worker_id: Option<WorkerId>,

    /// Number of runners executing at once.
    pub parallelism: usize,

    /// Interval of the submission loop.
    pub poll_interval: Duration,

    /// How long running tasks may take to stop on exit.
    pub shutdown_grace: Duration,
}

/// A runner tracked by the coordinator.
#[derive(Debug)]
struct PoolEntry {
    id: RunnerId,
    task: Task,
    state: RunnerState,
    cancel: Arc<AtomicBool>,
}

/// Job configuration and the store it points at.
#[derive(Clone)]
struct Session {
    config: Arc<DepthConfig>,
    source: Arc<dyn PatchSource>,
}

/// Snapshot of a pool entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSummary {
    pub id: RunnerId,
    pub task_id: TaskId,
    pub state: RunnerState,
}

/// Runs the worker side of the protocol.
pub struct WorkerCoordinator {
    config: CoordinatorConfig,
    cache: Arc<PatchCache>,
    factory: Arc<dyn PatchSourceFactory>,
    engine: ReconstructionEngine,
    semaphore: Arc<Semaphore>,
    pool: RwLock<Vec<PoolEntry>>,
    session: RwLock<Option<Session>>,
    next_runner: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    last_status: Mutex<String>,
    outbound: mpsc::Sender<Message>,
    events: mpsc::Sender<RunnerEvent>,
}

impl WorkerCoordinator {
    /// Create a coordinator. Runners report on `events`; its receiving end
    /// goes to [`WorkerCoordinator::run`].
    pub fn new(
        config: CoordinatorConfig,
        cache: Arc<PatchCache>,
        factory: Arc<dyn PatchSourceFactory>,
        engine: ReconstructionEngine,
        outbound: mpsc::Sender<Message>,
        events: mpsc::Sender<RunnerEvent>,
    ) -> Self {
        let permits = config.parallelism.max(1);
        Self {
            config,
            cache,
            factory,
            engine,
            semaphore: Arc::new(Semaphore::new(permits)),
            pool: RwLock::new(Vec::new()),
            session: RwLock::new(None),
            next_runner: AtomicU64::new(1),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_status: Mutex::new(String::new()),
            outbound,
            events,
        }
    }

    /// Process inbound messages and runner events until WORKER_EXIT, the end
    /// of input or shutdown, then run the exit procedure.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<Message>,
        mut events: mpsc::Receiver<RunnerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            parallelism = self.config.parallelism,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting worker coordinator"
        );

        if let Some(worker_id) = &self.config.worker_id {
            self.send(Message::WorkerJoin {
                worker_id: worker_id.clone(),
                capacity: self.config.parallelism,
            })
            .await;
        }
        self.publish_status().await;

        let mut submit = tokio::time::interval(self.config.poll_interval);
        submit.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else {
                        info!("Input closed");
                        break;
                    };
                    if self.handle_message(message).await.is_break() {
                        break;
                    }
                }
                Some(event) = events.recv() => {
                    self.handle_event(event).await;
                }
                _ = submit.tick() => {
                    self.submit_idle().await;
                    self.publish_status().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Coordinator shutting down");
                        break;
                    }
                }
            }
        }

        self.exit(&mut events).await;
    }

    /// Dispatch one inbound message.
    pub async fn handle_message(self: &Arc<Self>, message: Message) -> ControlFlow<()> {
        match message {
            Message::WorkerData { payload, .. } => match payload {
                WorkerPayload::TaskConfig(config) => self.load_config(config).await,
                WorkerPayload::TaskExecute(task) => self.enqueue(task).await,
                WorkerPayload::SysCall(command) => self.sys_call(command).await,
                WorkerPayload::TaskResult { task_id, .. } => {
                    warn!(task_id = %task_id, "Ignoring TASK_RESULT sent to a worker");
                }
            },
            Message::WorkerExit { .. } => {
                info!("Exit requested");
                return ControlFlow::Break(());
            }
            other => {
                let tag = other.to_frame().tag;
                warn!(%tag, "Ignoring message not meant for a worker");
                self.log(LogLevel::Warning, format!("Unknown message: {tag}"))
                    .await;
            }
        }
        ControlFlow::Continue(())
    }

    /// Replace the job configuration and point the cache at its store.
    async fn load_config(&self, config: DepthConfig) {
        let source = match self.factory.connect(&config.point_cloud_db) {
            Ok(source) => source,
            Err(e) => {
                error!(error = %e, "Failed to set up point cloud store");
                self.log(LogLevel::Error, format!("Depth task configuration rejected: {e}"))
                    .await;
                return;
            }
        };

        self.cache
            .init(Arc::clone(&source), config.patch_limit)
            .await;
        *self.session.write().await = Some(Session {
            config: Arc::new(config),
            source,
        });
        self.log(LogLevel::Info, "Depth task configuration loaded.".to_string())
            .await;
    }

    /// Queue a task as an Idle runner.
    pub async fn enqueue(&self, task: Task) {
        let id = RunnerId(self.next_runner.fetch_add(1, Ordering::Relaxed));
        let task_id = task.id;
        self.pool.write().await.push(PoolEntry {
            id,
            task,
            state: RunnerState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
        });
        debug!(runner = %id, task_id = %task_id, "Runner queued");
        self.log(
            LogLevel::Info,
            format!("Region ID: {task_id} => Execution queued."),
        )
        .await;
    }

    /// Submit every Idle runner to the execution pool. Nothing is submitted
    /// before a configuration has been received.
    pub async fn submit_idle(self: &Arc<Self>) {
        let Some(session) = self.session.read().await.clone() else {
            return;
        };

        let mut pool = self.pool.write().await;
        for entry in pool.iter_mut().filter(|e| e.state == RunnerState::Idle) {
            entry.state = RunnerState::Pooled;
            let ctx = RunnerContext {
                config: Arc::clone(&session.config),
                source: Arc::clone(&session.source),
                cache: Arc::clone(&self.cache),
                engine: self.engine,
            };
            let runner = TaskRunner::new(
                entry.id,
                entry.task.clone(),
                Arc::clone(&entry.cancel),
                self.events.clone(),
            );
            let id = entry.id;
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let Ok(_permit) = Arc::clone(&this.semaphore).acquire_owned().await else {
                    return;
                };
                if this.mark_running(id).await {
                    runner.execute(ctx).await;
                }
            });
        }
    }

    /// Move a Pooled runner to Running. False when it was cancelled while
    /// waiting for a slot.
    async fn mark_running(&self, id: RunnerId) -> bool {
        let mut pool = self.pool.write().await;
        match pool.iter_mut().find(|e| e.id == id) {
            Some(entry)
                if entry.state == RunnerState::Pooled && !entry.cancel.load(Ordering::Relaxed) =>
            {
                entry.state = RunnerState::Running;
                true
            }
            _ => false,
        }
    }

    /// Handle one runner event.
    pub async fn handle_event(&self, event: RunnerEvent) {
        match event {
            RunnerEvent::Log { level, text, .. } => self.log_upstream(level, text).await,
            RunnerEvent::Finished {
                runner,
                task_id,
                state,
            } => {
                self.pool.write().await.retain(|e| e.id != runner);
                if state == RunnerState::Completed {
                    self.completed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                }
                debug!(runner = %runner, task_id = %task_id, %state, "Runner finished");
                self.send(Message::WorkerData {
                    worker_id: None,
                    payload: WorkerPayload::TaskResult { state, task_id },
                })
                .await;
            }
        }
    }

    /// Cancel queued runners, stop running ones, clear the cache and wait
    /// for the stopped runners to report.
    async fn exit(&self, events: &mut mpsc::Receiver<RunnerEvent>) {
        let mut notes = Vec::new();
        {
            let mut pool = self.pool.write().await;
            pool.retain(|entry| {
                entry.cancel.store(true, Ordering::Relaxed);
                // Running runners stop on their own and still report.
                let running = entry.state == RunnerState::Running;
                let verb = if running { "stopped" } else { "cancelled" };
                notes.push(format!("Region ID: {} => Execution {verb}.", entry.task.id));
                running
            });
        }
        self.semaphore.close();
        for text in notes {
            self.log(LogLevel::Warning, text).await;
        }

        let stats = self.cache.stats().await;
        info!(
            hits = stats.hits,
            misses = stats.misses,
            waits = stats.waits,
            evictions = stats.evictions,
            resident = stats.resident,
            "Patch cache statistics"
        );
        self.cache.clear().await;

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while self.running_count().await > 0 {
                match events.recv().await {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                }
            }
        })
        .await;
        if drained.is_err() {
            let running = self.running_count().await;
            warn!(running, "Runners did not stop within the grace period");
        }
        while let Ok(event) = events.try_recv() {
            self.handle_event(event).await;
        }

        self.publish_status().await;
        if let Some(worker_id) = &self.config.worker_id {
            self.send(Message::WorkerLeave {
                worker_id: worker_id.clone(),
            })
            .await;
        }
        info!("Coordinator stopped");
    }

    /// Run a shell command on this host.
    async fn sys_call(self: &Arc<Self>, command: String) {
        self.log(LogLevel::Info, format!("System call: '{command}'"))
            .await;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .status()
                .await;
            match status {
                Ok(status) if status.success() => {
                    this.log(LogLevel::Info, format!("System call '{command}' finished: {status}"))
                        .await;
                }
                Ok(status) => {
                    this.log(LogLevel::Warning, format!("System call '{command}' failed: {status}"))
                        .await;
                }
                Err(e) => {
                    this.log(LogLevel::Warning, format!("System call '{command}' couldn't be started: {e}"))
                        .await;
                }
            }
        });
    }

    /// Runners currently in the pool.
    pub async fn runners(&self) -> Vec<RunnerSummary> {
        self.pool
            .read()
            .await
            .iter()
            .map(|e| RunnerSummary {
                id: e.id,
                task_id: e.task.id,
                state: e.state,
            })
            .collect()
    }

    async fn running_count(&self) -> usize {
        self.pool
            .read()
            .await
            .iter()
            .filter(|e| e.state == RunnerState::Running)
            .count()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// The status line as currently rendered.
    pub async fn status_line(&self) -> String {
        format!(
            "Anka-Depth v{VERSION} - Queued: {}, Completed: {}, Failed: {}",
            self.pool.read().await.len(),
            self.completed(),
            self.failed()
        )
    }

    /// Emit the status line if it changed since the last one.
    async fn publish_status(&self) {
        let status = self.status_line().await;
        let mut last = self.last_status.lock().await;
        if *last != status {
            last.clone_from(&status);
            drop(last);
            self.send(Message::Status(status)).await;
        }
    }

    async fn log(&self, level: LogLevel, text: String) {
        match level {
            LogLevel::Info => info!("{}", text),
            LogLevel::Warning => warn!("{}", text),
            LogLevel::Error => error!("{}", text),
        }
        self.log_upstream(level, text).await;
    }

    async fn log_upstream(&self, level: LogLevel, text: String) {
        self.send(Message::Log {
            source: LogSource::Worker,
            level,
            text,
        })
        .await;
    }

    async fn send(&self, message: Message) {
        if self.outbound.send(message).await.is_err() {
            debug!("Outbound channel closed");
        }
    }
}
