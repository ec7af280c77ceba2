//! Error taxonomy for matrix orchestration.

use serde::{Deserialize, Serialize};

/// Coarse classification of a failure.
///
/// The retry engine treats every class as retryable unless a caller opts
/// into a narrower predicate with `retry_when`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network, SSH or transfer hiccup.
    Transient,
    /// A remote command returned non-zero or timed out.
    Stage,
    /// Budget exhausted, bad configuration, or anything else not worth retrying.
    Fatal,
}

/// Errors produced by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("transient remote error on {host}: {detail}")]
    TransientRemote { host: String, detail: String },

    #[error("remote command exited with code {exit_code}: {stderr}")]
    RemoteExecution { exit_code: i32, stderr: String },

    #[error("stage {release}-{stage} timed out after {minutes} minute(s)")]
    StageTimeout {
        release: String,
        stage: String,
        minutes: u64,
    },

    #[error("stage {release}-{stage} failed: {cause}")]
    StageFailure {
        release: String,
        stage: String,
        cause: String,
    },

    #[error("node allocation from pool '{pool}' failed after {attempts} attempt(s): {last_error}")]
    AllocationExhausted {
        pool: String,
        attempts: u32,
        last_error: Box<MatrixError>,
    },

    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: Box<MatrixError>,
    },

    #[error("pool API error: {0}")]
    Pool(String),

    #[error("status notification error: {0}")]
    Notification(String),

    #[error("report publication error: {0}")]
    Report(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("matrix failed: {}", failed.join(", "))]
    MatrixFailed { failed: Vec<String> },

    #[error("finalization failed: {}", errors.join("; "))]
    Finalization { errors: Vec<String> },

    #[error("task error: {0}")]
    Task(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("toml render error: {0}")]
    TomlRender(#[from] toml::ser::Error),
}

impl MatrixError {
    /// Classify this error for retry decisions and reporting.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            MatrixError::TransientRemote { .. }
            | MatrixError::Pool(_)
            | MatrixError::Http(_)
            | MatrixError::Io(_) => FailureClass::Transient,
            MatrixError::RemoteExecution { .. }
            | MatrixError::StageTimeout { .. }
            | MatrixError::StageFailure { .. }
            | MatrixError::MatrixFailed { .. } => FailureClass::Stage,
            MatrixError::RetryExhausted { last_error, .. } => last_error.failure_class(),
            _ => FailureClass::Fatal,
        }
    }

    /// Exit code of the remote command, if one was observed.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            MatrixError::RemoteExecution { exit_code, .. } => Some(*exit_code),
            MatrixError::RetryExhausted { last_error, .. } => last_error.exit_code(),
            _ => None,
        }
    }
}

/// Result type for orchestrator operations.
pub type MatrixResult<T> = std::result::Result<T, MatrixError>;
