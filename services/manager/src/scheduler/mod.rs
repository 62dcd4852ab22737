//! Grid scheduling.
//!
//! [`GridScheduler`] holds the backlog and assignments; [`ManagerService`]
//! drives it from protocol messages and a periodic tick.

mod grid;
mod service;

pub use grid::{GridScheduler, GridStatus, TickReport};
pub use service::{ManagerService, StopReason};
