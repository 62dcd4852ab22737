//! Completed and failed task logs.
//!
//! Each log is a flat text file with one task id per line. The manager
//! appends to them as results arrive and reads them back at startup to skip
//! regions finished by earlier runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ankadepth_proto::TaskId;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::FatalError;

/// Ids read back from one log.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Restored {
    pub ids: HashSet<TaskId>,
    /// Number of id lines, duplicates included.
    pub count: u64,
}

/// Which log an outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

/// The pair of outcome logs.
#[derive(Debug, Clone)]
pub struct TaskLedger {
    completed: PathBuf,
    failed: PathBuf,
}

impl TaskLedger {
    pub fn new(completed: impl Into<PathBuf>, failed: impl Into<PathBuf>) -> Self {
        Self {
            completed: completed.into(),
            failed: failed.into(),
        }
    }

    pub fn path(&self, outcome: Outcome) -> &Path {
        match outcome {
            Outcome::Completed => &self.completed,
            Outcome::Failed => &self.failed,
        }
    }

    /// Read one log. A missing file restores nothing.
    pub async fn restore(&self, outcome: Outcome) -> Result<Restored, FatalError> {
        let path = self.path(outcome);
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Restored::default()),
            Err(source) => {
                return Err(FatalError::Ledger {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut restored = Restored::default();
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            match line.parse::<TaskId>() {
                Ok(id) => {
                    restored.ids.insert(id);
                    restored.count += 1;
                }
                Err(_) => warn!(path = %path.display(), line, "Skipping unparsable ledger line"),
            }
        }
        Ok(restored)
    }

    /// Append one id to a log.
    pub async fn append(&self, outcome: Outcome, id: TaskId) -> Result<(), FatalError> {
        let path = self.path(outcome);
        let ledger_error = |source| FatalError::Ledger {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(ledger_error)?;
        file.write_all(format!("{id}\n").as_bytes())
            .await
            .map_err(ledger_error)?;
        file.flush().await.map_err(ledger_error)
    }

    /// Open both logs for appending, creating them if needed.
    pub async fn check_writable(&self) -> Result<(), FatalError> {
        for path in [&self.completed, &self.failed] {
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|source| FatalError::Ledger {
                    path: path.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}
