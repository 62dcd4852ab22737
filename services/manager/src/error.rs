//! Manager error types.

use std::path::PathBuf;

use ankadepth_db::DbError;
use ankadepth_proto::{TaskId, WorkerId};
use thiserror::Error;

/// Errors reading the INI job configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Failures that stop the manager before or while it schedules.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Invalid input parameters. Check configuration!")]
    InvalidConfig,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    RegionConnect(#[source] DbError),

    #[error("Query execution error: {0}")]
    RegionQuery(#[source] DbError),

    #[error("Log file {} couldn't open.", path.display())]
    Ledger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FatalError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig | Self::Config(_) => 1,
            Self::RegionConnect(_) => 2,
            Self::RegionQuery(_) => 3,
            Self::Ledger { .. } => 4,
        }
    }
}

impl From<DbError> for FatalError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Connect(_) => Self::RegionConnect(err),
            DbError::Query(_) => Self::RegionQuery(err),
        }
    }
}

/// Rejected scheduler operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("worker {0} is not part of the grid")]
    UnknownWorker(WorkerId),

    #[error("worker {0} is already part of the grid")]
    DuplicateWorker(WorkerId),

    #[error("worker {worker} has no assigned task {task_id}")]
    UnknownTask { worker: WorkerId, task_id: TaskId },

    #[error("worker {0} declared zero capacity")]
    ZeroCapacity(WorkerId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ledger_error() -> FatalError {
        FatalError::Ledger {
            path: PathBuf::from("completed.txt"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        }
    }

    #[rstest]
    #[case(FatalError::InvalidConfig, 1)]
    #[case(FatalError::from(DbError::Connect(sqlx::Error::PoolTimedOut)), 2)]
    #[case(FatalError::from(DbError::Query(sqlx::Error::RowNotFound)), 3)]
    #[case(ledger_error(), 4)]
    fn test_exit_codes(#[case] err: FatalError, #[case] code: i32) {
        assert_eq!(err.exit_code(), code);
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            FatalError::InvalidConfig.to_string(),
            "Invalid input parameters. Check configuration!"
        );
        assert_eq!(ledger_error().to_string(), "Log file completed.txt couldn't open.");
        assert!(FatalError::from(DbError::Connect(sqlx::Error::PoolTimedOut))
            .to_string()
            .starts_with("Database connection error: "));
    }
}
