//! Error taxonomy of the orchestrator.
//!
//! Each error is contained by the component that produced it and surfaced
//! through the status board; none of them stops the process.

use matchbox_common::FieldNumber;
use serde::Serialize;

/// Scoring feed connection or protocol failure. Always triggers a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("failed to send keepalive: {0}")]
    Keepalive(String),
}

/// A single message that could not be decoded. Logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message has no type")]
    MissingType,

    #[error("{kind} message has no field number")]
    MissingField { kind: String },

    #[error("invalid field number: {0}")]
    InvalidField(String),

    #[error("{kind} message has no match label")]
    MissingLabel { kind: String },
}

/// Scene switch failure: controller unreachable or command rejected.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SwitchError {
    #[error("controller unreachable: {0}")]
    Unreachable(String),

    #[error("controller rejected scene '{scene}': {message}")]
    Rejected { scene: String, message: String },

    #[error("gave up on scene '{scene}' for field {field} after {attempts} attempts: {last_error}")]
    Exhausted {
        field: FieldNumber,
        scene: String,
        attempts: u32,
        last_error: String,
    },
}

/// Why an extraction attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    /// The controller is not recording, or the recording file does not exist.
    SourceMissing,
    /// The controller could not be asked for the recording.
    SourceUnavailable,
    /// The trimming process failed, timed out, or could not be started.
    ProcessFailed,
    /// Staging or committing the output failed.
    WriteFailed,
}

impl std::fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SourceMissing => "source missing",
            Self::SourceUnavailable => "source unavailable",
            Self::ProcessFailed => "process failed",
            Self::WriteFailed => "write failed",
        };
        f.write_str(s)
    }
}

/// A failed extraction attempt. Handed back to the scheduler's retry policy.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub message: String,
}

impl ExtractionError {
    pub fn new(kind: ExtractionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn source_missing(message: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::SourceMissing, message)
    }

    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::WriteFailed, message)
    }
}

impl From<matchbox_av::Error> for ExtractionError {
    fn from(err: matchbox_av::Error) -> Self {
        use matchbox_av::Error as AvError;

        let kind = match &err {
            AvError::RecordingMissing { .. } => ExtractionErrorKind::SourceMissing,
            AvError::Staging(_) | AvError::Io(_) => ExtractionErrorKind::WriteFailed,
            AvError::ToolNotFound { .. }
            | AvError::ToolFailed { .. }
            | AvError::Timeout { .. }
            | AvError::InvalidWindow(_) => ExtractionErrorKind::ProcessFailed,
        };
        Self::new(kind, err.to_string())
    }
}

/// Configuration problem. Reported once; needs operator action.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("event code is required")]
    MissingEventCode,

    #[error("field count must be at least 1")]
    NoFields,

    #[error("no scene mapped for field {0}")]
    UnmappedField(FieldNumber),

    #[error("field {field} is outside the configured 1..={count}")]
    UnknownField { field: FieldNumber, count: u32 },

    #[error("invalid scene mapping key '{0}': expected a field number")]
    InvalidSceneKey(String),

    #[error("invalid {name}: {value} (must be a finite number >= 0)")]
    InvalidBuffer { name: &'static str, value: f64 },

    #[error("{0} must be at least 1")]
    ZeroValue(&'static str),

    #[error("server port cannot be 0")]
    ZeroPort,
}
