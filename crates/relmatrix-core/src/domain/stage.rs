//! Stage specifications and per-stage outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{FailureClass, MatrixError, MatrixResult};

/// One named build-tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSpec {
    /// Stage name used in outcomes and notification contexts.
    pub name: String,

    /// Command to run on the remote host (first element is the executable).
    pub command: Vec<String>,

    /// Timeout in minutes; 0 disables the timeout.
    pub timeout_minutes: u64,

    /// Required stages abort the rest of their release pipeline on failure.
    pub required: bool,
}

impl StageSpec {
    /// Render the command as a single remote shell line.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Terminal status of a stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failure,
}

/// Error details captured into a failed outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorInfo {
    pub class: FailureClass,
    pub message: String,
    pub exit_code: Option<i32>,
}

impl From<&MatrixError> for ErrorInfo {
    fn from(err: &MatrixError) -> Self {
        Self {
            class: err.failure_class(),
            message: err.to_string(),
            exit_code: err.exit_code(),
        }
    }
}

/// Result of one stage execution. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageOutcome {
    pub stage: String,
    pub release: String,
    pub status: StageStatus,
    pub error: Option<ErrorInfo>,
    /// Attempts spent on this stage (1 unless a retry policy wrapped it).
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StageOutcome {
    /// Record a passing stage.
    pub fn success(release: &str, stage: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            stage: stage.to_string(),
            release: release.to_string(),
            status: StageStatus::Success,
            error: None,
            attempts: 1,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Record a failed stage with the error that ended it.
    pub fn failure(
        release: &str,
        stage: &str,
        err: &MatrixError,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage: stage.to_string(),
            release: release.to_string(),
            status: StageStatus::Failure,
            error: Some(ErrorInfo::from(err)),
            attempts: 1,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Override the attempt count.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Notification context, `<release>-<stage>`.
    pub fn context(&self) -> String {
        format!("{}-{}", self.release, self.stage)
    }

    /// Whether the stage succeeded.
    pub fn passed(&self) -> bool {
        self.status == StageStatus::Success
    }

    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Re-raise a failed outcome as `StageFailure`, keep a passing one.
    pub fn into_result(self) -> MatrixResult<StageOutcome> {
        match self.status {
            StageStatus::Success => Ok(self),
            StageStatus::Failure => Err(MatrixError::StageFailure {
                cause: self
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "unknown error".to_string()),
                release: self.release,
                stage: self.stage,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_joins_args() {
        let spec = StageSpec {
            name: "unit".to_string(),
            command: vec!["ci".to_string(), "unit".to_string(), "--no-build".to_string()],
            timeout_minutes: 30,
            required: false,
        };
        assert_eq!(spec.command_line(), "ci unit --no-build");
    }

    #[test]
    fn test_failed_outcome_reraises_stage_failure() {
        let err = MatrixError::RemoteExecution {
            exit_code: 1,
            stderr: "tests failed".to_string(),
        };
        let outcome = StageOutcome::failure("pip", "unit", &err, Utc::now());
        assert!(!outcome.passed());
        assert_eq!(outcome.context(), "pip-unit");
        assert_eq!(outcome.error.as_ref().and_then(|e| e.exit_code), Some(1));

        match outcome.into_result() {
            Err(MatrixError::StageFailure {
                release,
                stage,
                cause,
            }) => {
                assert_eq!(release, "pip");
                assert_eq!(stage, "unit");
                assert!(cause.contains("tests failed"));
            }
            other => panic!("expected StageFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_passed_outcome_into_result_is_ok() {
        let outcome = StageOutcome::success("f32", "docs", Utc::now()).with_attempts(2);
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.into_result().is_ok());
    }
}
