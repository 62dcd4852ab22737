//! Identifier types shared by the manager and workers.

use std::fmt;
use std::str::FromStr;

use crate::ProtoError;

/// Identifier of a region task, as stored in the region database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(i64);

impl TaskId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| ProtoError::invalid("task id", s))
    }
}

/// Identifier of a point-cloud patch in the point-cloud store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatchId(i64);

impl PatchId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a worker process, assigned by the process supervisor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    /// Parses a worker id. Ids are opaque but must be non-empty and must not
    /// contain protocol separators.
    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        let s = s.trim();
        if s.is_empty()
            || s.contains(crate::FIELD_SEPARATOR)
            || s.contains(crate::DATA_SEPARATOR)
        {
            return Err(ProtoError::invalid("worker id", s));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkerId {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_parse() {
        let id: TaskId = " 42 ".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_task_id_invalid() {
        let result: Result<TaskId, _> = "forty-two".parse();
        assert!(matches!(
            result.unwrap_err(),
            ProtoError::InvalidField { field: "task id", .. }
        ));
    }

    #[test]
    fn test_worker_id_rejects_separators() {
        assert!(WorkerId::parse("node-1").is_ok());
        assert!(WorkerId::parse("").is_err());
        assert!(WorkerId::parse("a|b").is_err());
        assert!(WorkerId::parse("a;b").is_err());
    }
}
