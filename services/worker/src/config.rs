//! Process settings for the worker.
//!
//! The depth job configuration itself arrives over the protocol
//! (TASK_CONFIG); only process-local knobs are read here.

use std::time::Duration;

use anyhow::Result;
use ankadepth_proto::WorkerId;

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity announced with WORKER_JOIN. When unset the supervisor is
    /// expected to announce the worker.
    pub worker_id: Option<WorkerId>,

    /// Size of the execution pool; also scales the patch cache.
    pub parallelism: usize,

    /// Interval of the pool submission loop.
    pub poll_interval: Duration,

    /// How long running tasks may take to stop after WORKER_EXIT.
    pub shutdown_grace: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let worker_id = std::env::var("ANKA_WORKER_ID")
            .ok()
            .map(|s| WorkerId::parse(&s))
            .transpose()?;

        let parallelism = std::env::var("ANKA_PARALLELISM")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or_else(default_parallelism);

        let poll_interval_ms = std::env::var("ANKA_POLL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);

        let shutdown_grace_secs = std::env::var("ANKA_SHUTDOWN_GRACE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let log_level = std::env::var("ANKA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            worker_id,
            parallelism,
            poll_interval: Duration::from_millis(poll_interval_ms),
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
            log_level,
        })
    }
}

/// Hardware parallelism, falling back to a single slot.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
