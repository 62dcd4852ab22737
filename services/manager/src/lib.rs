//! Ankadepth grid manager.
//!
//! Apportions depth regions across the workers of a compute grid.
//!
//! ```text
//! region store ──> load_backlog ──> GridScheduler
//!                                        │
//! stdin ──> read_messages ──> ManagerService ──> write_messages ──> stdout
//!                                        │
//!                                   TaskLedger (completed.txt / failed.txt)
//! ```
//!
//! The manager hands each joining worker the job configuration, keeps every
//! worker filled up to its declared capacity while the grid is started and
//! the work schedule permits, reclaims assignments that take too long, and
//! exits once every region has an outcome.

pub mod config;
pub mod console;
pub mod error;
pub mod ledger;
pub mod regions;
pub mod schedule;
pub mod scheduler;
pub mod startup;
pub mod testing;

pub use config::{load_depth_config, Config};
pub use console::Console;
pub use error::{ConfigError, FatalError, SchedulerError};
pub use ledger::{Outcome, TaskLedger};
pub use regions::{MockRegionSource, PgRegionSource, RegionSource};
pub use scheduler::{GridScheduler, GridStatus, ManagerService, StopReason, TickReport};
pub use startup::load_backlog;
