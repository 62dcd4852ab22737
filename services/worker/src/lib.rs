//! Ankadepth grid worker library.
//!
//! A worker receives the depth job configuration and region tasks from the
//! manager, reconstructs one depth image per task and reports the outcome.
//!
//! ## Architecture
//!
//! ```text
//! stdin ──> read_messages ──> WorkerCoordinator ──> write_messages ──> stdout
//!                                   │    ▲
//!                            spawn  │    │ RunnerEvent
//!                                   ▼    │
//!                               TaskRunner ──> PatchCache ──> PatchSource
//! ```
//!
//! ## Modules
//!
//! - `cache`: process-wide patch cache with load deduplication
//! - `calibration`: per-capture `setup.ank` files
//! - `coordinator`: runner pool and protocol dispatch
//! - `runner`: execution of one task
//! - `store`: point-cloud store access

pub mod cache;
pub mod calibration;
pub mod config;
pub mod coordinator;
pub mod runner;
pub mod store;
pub mod testing;

pub use cache::{CacheStatsSnapshot, PatchCache, PatchPoints};
pub use calibration::{load_calibration, CalibrationError};
pub use config::Config;
pub use coordinator::{CoordinatorConfig, RunnerSummary, WorkerCoordinator};
pub use runner::{RunnerContext, RunnerError, RunnerEvent, RunnerId, TaskRunner};
pub use store::{
    MockPatchSource, PatchError, PatchSource, PatchSourceFactory, PgPatchSource,
    PgPatchSourceFactory,
};
