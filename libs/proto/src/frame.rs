//! Line framing.
//!
//! Every message occupies one line: a tag followed by fields, joined with
//! [`FIELD_SEPARATOR`]. Payload fields that carry structured values (tasks,
//! configuration) join their own items with [`DATA_SEPARATOR`].

use std::fmt;
use std::str::FromStr;

use crate::ProtoError;

/// Separator between the fields of a message line.
pub const FIELD_SEPARATOR: char = '|';

/// Separator between the items of a structured payload field.
pub const DATA_SEPARATOR: char = ';';

/// Message tag, the first field of every line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    WorkerJoin,
    WorkerLeave,
    WorkerData,
    WorkerExit,
    TerminalCommand,
    StatusMessage,
    Log,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkerJoin => "WORKER_JOIN",
            Self::WorkerLeave => "WORKER_LEAVE",
            Self::WorkerData => "WORKER_DATA",
            Self::WorkerExit => "WORKER_EXIT",
            Self::TerminalCommand => "TERMINAL_COMMAND",
            Self::StatusMessage => "STATUS_MESSAGE",
            Self::Log => "LOG",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WORKER_JOIN" => Ok(Self::WorkerJoin),
            "WORKER_LEAVE" => Ok(Self::WorkerLeave),
            "WORKER_DATA" => Ok(Self::WorkerData),
            "WORKER_EXIT" => Ok(Self::WorkerExit),
            "TERMINAL_COMMAND" => Ok(Self::TerminalCommand),
            "STATUS_MESSAGE" => Ok(Self::StatusMessage),
            "LOG" => Ok(Self::Log),
            other => Err(ProtoError::UnknownTag(other.to_string())),
        }
    }
}

/// A tagged, untyped message line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: Tag,
    pub fields: Vec<String>,
}

impl Frame {
    pub fn new(tag: Tag, fields: Vec<String>) -> Self {
        Self { tag, fields }
    }

    /// Split a raw line into its tag and fields.
    pub fn parse(line: &str) -> Result<Self, ProtoError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.split(FIELD_SEPARATOR);
        let tag = match parts.next().map(str::trim) {
            None | Some("") => return Err(ProtoError::EmptyLine),
            Some(tag) => tag.parse()?,
        };

        Ok(Self {
            tag,
            fields: parts.map(str::to_string).collect(),
        })
    }

    /// Render the frame as a single line, without the trailing newline.
    ///
    /// Line breaks inside fields are flattened so a frame always stays on one
    /// line.
    pub fn encode(&self) -> String {
        let mut line = String::from(self.tag.as_str());
        for field in &self.fields {
            line.push(FIELD_SEPARATOR);
            if field.contains(['\r', '\n']) {
                line.push_str(&field.replace(['\r', '\n'], " "));
            } else {
                line.push_str(field);
            }
        }
        line
    }

    /// Fields from `start` onwards re-joined with the field separator, for
    /// free-text payloads that may themselves contain it.
    pub fn rest(&self, start: usize) -> String {
        self.fields
            .get(start..)
            .map(|rest| rest.join(&FIELD_SEPARATOR.to_string()))
            .unwrap_or_default()
    }
}
