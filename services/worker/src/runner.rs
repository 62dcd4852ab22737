//! Execution of one region task.
//!
//! A [`TaskRunner`] retrieves the task's patches through the shared cache,
//! reconstructs the depth image on the blocking pool and writes it under the
//! output root. Progress and the final outcome are reported as
//! [`RunnerEvent`]s; the runner never touches the protocol directly.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ankadepth_proto::{DepthConfig, LogLevel, RunnerState, Task, TaskId};
use ankadepth_reconstruct::{
    save_png, DistanceSlices, Pose, ReconstructError, ReconstructionEngine, SpatialPoint,
};
use glam::DVec3;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::PatchCache;
use crate::calibration::{calibration_path, load_calibration};
use crate::store::{PatchError, PatchSource};

/// Local handle of a runner. Task ids may repeat when the manager requeues a
/// task, runner ids do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunnerId(pub u64);

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notification from a runner to its coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    Log {
        runner: RunnerId,
        level: LogLevel,
        text: String,
    },
    /// Always the last event of a runner.
    Finished {
        runner: RunnerId,
        task_id: TaskId,
        state: RunnerState,
    },
}

/// Reasons a task ends in [`RunnerState::ErrorState`].
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Execution halted, file system error, directory couldn't be created. {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not enough patches to process! Retrieved patch count:{found} < threshold:{threshold}")]
    InsufficientPatches { found: usize, threshold: u32 },

    #[error("{0}")]
    Store(#[source] PatchError),

    #[error("Patch bufferer error: {0}")]
    Patches(#[source] PatchError),

    #[error("Execution failed. {0}")]
    Reconstruct(#[source] ReconstructError),

    #[error("Execution failed. Output verification failed at: {}", .0.display())]
    Verification(PathBuf),

    #[error("Execution failed. Reconstruction task aborted: {0}")]
    Aborted(String),
}

/// Everything a runner shares with the other runners of the worker.
#[derive(Clone)]
pub struct RunnerContext {
    pub config: Arc<DepthConfig>,
    pub source: Arc<dyn PatchSource>,
    pub cache: Arc<PatchCache>,
    pub engine: ReconstructionEngine,
}

/// Output directory and file of a task.
pub fn output_paths(output_root: &Path, task: &Task) -> (PathBuf, PathBuf) {
    let dir = output_root.join(&task.parent_dir).join(&task.sub_dir);
    let file = dir.join(format!("{}.png", task.file_stem()));
    (dir, file)
}

/// Observer pose of a task.
pub fn task_pose(task: &Task) -> Pose {
    Pose {
        position: DVec3::new(task.x, task.y, task.altitude),
        heading: task.heading,
        pitch: task.pitch,
        roll: task.roll,
    }
}

enum Outcome {
    Completed(String),
    Skipped(String),
    Cancelled,
}

/// One task in execution.
pub struct TaskRunner {
    id: RunnerId,
    task: Task,
    cancel: Arc<AtomicBool>,
    events: mpsc::Sender<RunnerEvent>,
}

impl TaskRunner {
    pub fn new(
        id: RunnerId,
        task: Task,
        cancel: Arc<AtomicBool>,
        events: mpsc::Sender<RunnerEvent>,
    ) -> Self {
        Self {
            id,
            task,
            cancel,
            events,
        }
    }

    /// Run the task to a terminal state and report it.
    pub async fn execute(self, ctx: RunnerContext) -> RunnerState {
        let task_id = self.task.id;
        self.log(LogLevel::Info, "Execution started.").await;

        let state = match self.run(&ctx).await {
            Ok(Outcome::Completed(text)) => {
                self.log(LogLevel::Info, &text).await;
                RunnerState::Completed
            }
            Ok(Outcome::Skipped(text)) => {
                self.log(LogLevel::Warning, &text).await;
                RunnerState::Completed
            }
            Ok(Outcome::Cancelled) => {
                self.log(LogLevel::Warning, "Execution cancelled.").await;
                RunnerState::Idle
            }
            Err(e) => {
                self.log(LogLevel::Error, &e.to_string()).await;
                RunnerState::ErrorState
            }
        };

        let _ = self
            .events
            .send(RunnerEvent::Finished {
                runner: self.id,
                task_id,
                state,
            })
            .await;
        state
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    async fn log(&self, level: LogLevel, text: &str) {
        let text = format!("Region ID: {} => {}", self.task.id, text);
        match level {
            LogLevel::Info => info!(task_id = %self.task.id, "{}", text),
            LogLevel::Warning => warn!(task_id = %self.task.id, "{}", text),
            LogLevel::Error => error!(task_id = %self.task.id, "{}", text),
        }
        let _ = self
            .events
            .send(RunnerEvent::Log {
                runner: self.id,
                level,
                text,
            })
            .await;
    }

    async fn run(&self, ctx: &RunnerContext) -> Result<Outcome, RunnerError> {
        let started = Instant::now();
        let config = &ctx.config;
        let (out_dir, out_file) = output_paths(Path::new(&config.output_root), &self.task);

        if !config.worker_reprocess && tokio::fs::try_exists(&out_file).await.unwrap_or(false) {
            return Ok(Outcome::Skipped(format!(
                "Execution halted, file already exists and 'WorkerReprocess' option is not specified. {}",
                out_file.display()
            )));
        }

        let setup = calibration_path(
            Path::new(&config.ank_root),
            &self.task.parent_dir,
            &self.task.sub_dir,
        );
        let calibration = match load_calibration(&setup) {
            Ok(calibration) => calibration,
            Err(e) => {
                self.log(LogLevel::Warning, &e.to_string()).await;
                Default::default()
            }
        };

        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|source| RunnerError::CreateDir {
                path: out_dir.clone(),
                source,
            })?;

        let points = match self.load_points(ctx).await? {
            Some(points) => points,
            None => return Ok(Outcome::Cancelled),
        };
        debug!(task_id = %self.task.id, points = points.len(), "Points retrieved");

        let pose = task_pose(&self.task);
        let engine = ctx.engine;
        let cancel = Arc::clone(&self.cancel);
        let path = out_file.clone();
        let result = tokio::task::spawn_blocking(move || {
            let slices = DistanceSlices::build(points, &pose, &cancel)?;
            let image = engine.reconstruct(&slices, &pose, &calibration, &cancel)?;
            save_png(&image, &path)
        })
        .await
        .map_err(|e| RunnerError::Aborted(e.to_string()))?;

        match result {
            Ok(()) => {}
            Err(ReconstructError::Cancelled(stage)) => {
                debug!(task_id = %self.task.id, %stage, "Reconstruction interrupted");
                return Ok(Outcome::Cancelled);
            }
            Err(e) => return Err(RunnerError::Reconstruct(e)),
        }

        if !tokio::fs::try_exists(&out_file).await.unwrap_or(false) {
            return Err(RunnerError::Verification(out_file));
        }
        Ok(Outcome::Completed(format!(
            "Execution finished successfully in {:.3} seconds. Output: {}",
            started.elapsed().as_secs_f64(),
            out_file.display()
        )))
    }

    /// Retrieve the task's points. `None` when cancelled in between.
    async fn load_points(&self, ctx: &RunnerContext) -> Result<Option<Vec<SpatialPoint>>, RunnerError> {
        if self.cancelled() {
            return Ok(None);
        }
        let ids = ctx
            .source
            .find_patches(&self.task, ctx.config.patch_limit)
            .await
            .map_err(RunnerError::Store)?;

        if self.cancelled() {
            return Ok(None);
        }
        if ids.len() < ctx.config.patch_threshold as usize {
            return Err(RunnerError::InsufficientPatches {
                found: ids.len(),
                threshold: ctx.config.patch_threshold,
            });
        }

        let points = ctx.cache.load_patches(&ids).await.map_err(RunnerError::Patches)?;
        if self.cancelled() {
            return Ok(None);
        }
        Ok(Some(points))
    }
}
