//! Shared protocol for the ankadepth manager and workers.
//!
//! Both processes talk through a supervisor that relays newline-terminated
//! text lines over stdin/stdout. This crate owns the line framing, the typed
//! messages, and the task and configuration payload codecs.

pub mod config;
pub mod error;
pub mod frame;
pub mod ids;
pub mod message;
pub mod task;
pub mod transport;

pub use config::{split_list, DbEndpoint, DepthConfig, WorkSchedule};
pub use error::ProtoError;
pub use frame::{Frame, Tag, DATA_SEPARATOR, FIELD_SEPARATOR};
pub use ids::{PatchId, TaskId, WorkerId};
pub use message::{
    Addressing, LogLevel, LogSource, Message, ParameterType, RunnerState, TerminalCommand,
    WorkerPayload,
};
pub use task::Task;
pub use transport::{read_messages, write_messages};

/// Version reported in status lines.
pub const VERSION: &str = "1.0.0.0";
