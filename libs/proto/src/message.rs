//! Typed protocol messages.
//!
//! A raw [`Frame`] is lifted into a closed [`Message`] enum so both processes
//! dispatch with an exhaustive `match`. WORKER_DATA is addressed differently
//! depending on who reads it: the supervisor prefixes the worker id on lines
//! travelling to the manager, and strips it on lines travelling to a worker.

use std::fmt;
use std::str::FromStr;

use crate::{DepthConfig, Frame, ProtoError, Tag, Task, TaskId, WorkerId};

/// Execution state of a task on a worker. The numeric codes are carried in
/// TASK_RESULT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerState {
    ErrorState,
    Idle,
    Pooled,
    Running,
    Completed,
}

impl RunnerState {
    pub fn code(self) -> i32 {
        match self {
            Self::ErrorState => -1,
            Self::Idle => 0,
            Self::Pooled => 1,
            Self::Running => 2,
            Self::Completed => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::ErrorState),
            0 => Some(Self::Idle),
            1 => Some(Self::Pooled),
            2 => Some(Self::Running),
            3 => Some(Self::Completed),
            _ => None,
        }
    }

    /// True for states a runner never leaves on its own.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::ErrorState)
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ErrorState => "error",
            Self::Idle => "idle",
            Self::Pooled => "pooled",
            Self::Running => "running",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Parameter type of a WORKER_DATA message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    SysCall,
    TaskConfig,
    TaskExecute,
    TaskResult,
}

impl ParameterType {
    pub fn code(self) -> u8 {
        match self {
            Self::SysCall => 0,
            Self::TaskConfig => 1,
            Self::TaskExecute => 2,
            Self::TaskResult => 3,
        }
    }
}

impl FromStr for ParameterType {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(Self::SysCall),
            "1" => Ok(Self::TaskConfig),
            "2" => Ok(Self::TaskExecute),
            "3" => Ok(Self::TaskResult),
            other => Err(ProtoError::UnknownParameter(other.to_string())),
        }
    }
}

/// Payload of a WORKER_DATA message.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerPayload {
    /// Shell command to run on the worker host.
    SysCall(String),
    TaskConfig(DepthConfig),
    TaskExecute(Task),
    TaskResult { state: RunnerState, task_id: TaskId },
}

impl WorkerPayload {
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            Self::SysCall(_) => ParameterType::SysCall,
            Self::TaskConfig(_) => ParameterType::TaskConfig,
            Self::TaskExecute(_) => ParameterType::TaskExecute,
            Self::TaskResult { .. } => ParameterType::TaskResult,
        }
    }

    fn encode_into(&self, fields: &mut Vec<String>) {
        fields.push(self.parameter_type().code().to_string());
        match self {
            Self::SysCall(command) => fields.push(command.clone()),
            Self::TaskConfig(config) => fields.push(config.encode()),
            Self::TaskExecute(task) => fields.push(task.encode()),
            Self::TaskResult { state, task_id } => {
                fields.push(state.code().to_string());
                fields.push(task_id.to_string());
            }
        }
    }

    fn decode(frame: &Frame, at: usize) -> Result<Self, ProtoError> {
        let field = |i: usize| frame.fields.get(at + i).map(String::as_str);
        let parameter: ParameterType = field(0)
            .ok_or(ProtoError::FieldCount {
                message: "WORKER_DATA",
                expected: at + 2,
                actual: frame.fields.len(),
            })?
            .parse()?;

        let expected = match parameter {
            ParameterType::TaskResult => at + 3,
            _ => at + 2,
        };
        if frame.fields.len() < expected {
            return Err(ProtoError::FieldCount {
                message: "WORKER_DATA",
                expected,
                actual: frame.fields.len(),
            });
        }

        match parameter {
            ParameterType::SysCall => Ok(Self::SysCall(frame.rest(at + 1))),
            ParameterType::TaskConfig => Ok(Self::TaskConfig(DepthConfig::decode(&frame.rest(at + 1))?)),
            ParameterType::TaskExecute => Ok(Self::TaskExecute(Task::decode(&frame.rest(at + 1))?)),
            ParameterType::TaskResult => {
                let raw = field(1).unwrap_or_default();
                let state = raw
                    .trim()
                    .parse::<i32>()
                    .ok()
                    .and_then(RunnerState::from_code)
                    .ok_or_else(|| ProtoError::invalid("task outcome", raw))?;
                let task_id = field(2).unwrap_or_default().parse()?;
                Ok(Self::TaskResult { state, task_id })
            }
        }
    }
}

/// Originator of a LOG line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Manager,
    Worker,
}

impl LogSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "MANAGER",
            Self::Worker => "WORKER",
        }
    }
}

impl FromStr for LogSource {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANAGER" => Ok(Self::Manager),
            "WORKER" => Ok(Self::Worker),
            other => Err(ProtoError::invalid("log source", other)),
        }
    }
}

/// Severity of a LOG line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Self::Info),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            other => Err(ProtoError::invalid("log level", other)),
        }
    }
}

/// Operator command typed at the manager console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCommand {
    Start,
    Stop,
    /// List every assigned task.
    Tasks,
    DropWorker(WorkerId),
    /// Run a shell command on every worker.
    SysWorkers(String),
    /// Run a shell command on one worker.
    SysWorker(WorkerId, String),
    /// Anything else the operator typed. Reported back, never executed.
    Unknown(String),
}

impl TerminalCommand {
    /// Parse console words. Words may arrive as separate fields or as one
    /// space separated field.
    pub fn parse(words: &[String]) -> Result<Self, ProtoError> {
        let words: Vec<&str> = words.iter().flat_map(|w| w.split_whitespace()).collect();
        let Some((command, args)) = words.split_first() else {
            return Err(ProtoError::FieldCount {
                message: "TERMINAL_COMMAND",
                expected: 1,
                actual: 0,
            });
        };

        match (*command, args) {
            ("start", _) => Ok(Self::Start),
            ("stop", _) => Ok(Self::Stop),
            ("tasks", _) => Ok(Self::Tasks),
            ("dropworker", [worker, ..]) => Ok(Self::DropWorker(WorkerId::parse(worker)?)),
            ("sysworkers", [_, ..]) => Ok(Self::SysWorkers(args.join(" "))),
            ("sysworker", [worker, cmd @ ..]) if !cmd.is_empty() => {
                Ok(Self::SysWorker(WorkerId::parse(worker)?, cmd.join(" ")))
            }
            _ => Ok(Self::Unknown(words.join(" "))),
        }
    }

    fn words(&self) -> Vec<String> {
        match self {
            Self::Start => vec!["start".to_string()],
            Self::Stop => vec!["stop".to_string()],
            Self::Tasks => vec!["tasks".to_string()],
            Self::DropWorker(worker) => vec!["dropworker".to_string(), worker.to_string()],
            Self::SysWorkers(cmd) => vec!["sysworkers".to_string(), cmd.clone()],
            Self::SysWorker(worker, cmd) => {
                vec!["sysworker".to_string(), worker.to_string(), cmd.clone()]
            }
            Self::Unknown(text) => vec![text.clone()],
        }
    }
}

/// Whether WORKER_DATA / WORKER_EXIT lines carry a leading worker id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Lines read by the manager: the supervisor names the sending worker.
    Addressed,
    /// Lines read by a worker: the recipient is implicit.
    Unaddressed,
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    WorkerJoin { worker_id: WorkerId, capacity: usize },
    WorkerLeave { worker_id: WorkerId },
    WorkerData { worker_id: Option<WorkerId>, payload: WorkerPayload },
    WorkerExit { worker_id: Option<WorkerId> },
    Terminal(TerminalCommand),
    Status(String),
    Log { source: LogSource, level: LogLevel, text: String },
}

impl Message {
    /// Render as a protocol line (without newline).
    pub fn encode(&self) -> String {
        self.to_frame().encode()
    }

    pub fn to_frame(&self) -> Frame {
        match self {
            Self::WorkerJoin { worker_id, capacity } => Frame::new(
                Tag::WorkerJoin,
                vec![worker_id.to_string(), capacity.to_string()],
            ),
            Self::WorkerLeave { worker_id } => {
                Frame::new(Tag::WorkerLeave, vec![worker_id.to_string()])
            }
            Self::WorkerData { worker_id, payload } => {
                let mut fields = Vec::new();
                if let Some(worker_id) = worker_id {
                    fields.push(worker_id.to_string());
                }
                payload.encode_into(&mut fields);
                Frame::new(Tag::WorkerData, fields)
            }
            Self::WorkerExit { worker_id } => Frame::new(
                Tag::WorkerExit,
                worker_id.iter().map(ToString::to_string).collect(),
            ),
            Self::Terminal(command) => Frame::new(Tag::TerminalCommand, command.words()),
            Self::Status(text) => Frame::new(Tag::StatusMessage, vec![text.clone()]),
            Self::Log {
                source,
                level,
                text,
            } => Frame::new(
                Tag::Log,
                vec![
                    source.as_str().to_string(),
                    level.as_str().to_string(),
                    text.clone(),
                ],
            ),
        }
    }

    /// Parse a protocol line.
    pub fn decode(line: &str, addressing: Addressing) -> Result<Self, ProtoError> {
        Self::from_frame(&Frame::parse(line)?, addressing)
    }

    pub fn from_frame(frame: &Frame, addressing: Addressing) -> Result<Self, ProtoError> {
        let count = |message: &'static str, expected: usize| {
            if frame.fields.len() == expected {
                Ok(())
            } else {
                Err(ProtoError::FieldCount {
                    message,
                    expected,
                    actual: frame.fields.len(),
                })
            }
        };

        match frame.tag {
            Tag::WorkerJoin => {
                count("WORKER_JOIN", 2)?;
                let capacity = frame.fields[1]
                    .trim()
                    .parse()
                    .map_err(|_| ProtoError::invalid("capacity", frame.fields[1].as_str()))?;
                Ok(Self::WorkerJoin {
                    worker_id: WorkerId::parse(&frame.fields[0])?,
                    capacity,
                })
            }
            Tag::WorkerLeave => {
                count("WORKER_LEAVE", 1)?;
                Ok(Self::WorkerLeave {
                    worker_id: WorkerId::parse(&frame.fields[0])?,
                })
            }
            Tag::WorkerData => match addressing {
                Addressing::Addressed => {
                    let worker = frame.fields.first().ok_or(ProtoError::FieldCount {
                        message: "WORKER_DATA",
                        expected: 3,
                        actual: 0,
                    })?;
                    Ok(Self::WorkerData {
                        worker_id: Some(WorkerId::parse(worker)?),
                        payload: WorkerPayload::decode(frame, 1)?,
                    })
                }
                Addressing::Unaddressed => Ok(Self::WorkerData {
                    worker_id: None,
                    payload: WorkerPayload::decode(frame, 0)?,
                }),
            },
            Tag::WorkerExit => match addressing {
                Addressing::Addressed => {
                    count("WORKER_EXIT", 1)?;
                    Ok(Self::WorkerExit {
                        worker_id: Some(WorkerId::parse(&frame.fields[0])?),
                    })
                }
                Addressing::Unaddressed => Ok(Self::WorkerExit { worker_id: None }),
            },
            Tag::TerminalCommand => Ok(Self::Terminal(TerminalCommand::parse(&frame.fields)?)),
            Tag::StatusMessage => Ok(Self::Status(frame.rest(0))),
            Tag::Log => {
                if frame.fields.len() < 3 {
                    return Err(ProtoError::FieldCount {
                        message: "LOG",
                        expected: 3,
                        actual: frame.fields.len(),
                    });
                }
                Ok(Self::Log {
                    source: frame.fields[0].parse()?,
                    level: frame.fields[1].parse()?,
                    text: frame.rest(2),
                })
            }
        }
    }
}
