//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding protocol lines and payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// The line carried no message tag.
    #[error("empty message line")]
    EmptyLine,

    /// The message tag is not part of the protocol.
    #[error("unknown message tag: {0}")]
    UnknownTag(String),

    /// A message or payload had the wrong number of fields.
    #[error("unexpected '{message}' arguments: expected {expected}, got {actual}")]
    FieldCount {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A field could not be parsed into its typed value.
    #[error("invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },

    /// The worker-data parameter type tag is unknown.
    #[error("unknown parameter type: {0}")]
    UnknownParameter(String),
}

impl ProtoError {
    pub(crate) fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
        }
    }
}
