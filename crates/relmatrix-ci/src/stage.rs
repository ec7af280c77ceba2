//! Build-tool stages and the stage runner.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relmatrix_core::obs::emit_stage_finished;
use relmatrix_core::{MatrixError, MatrixResult, NodeLease, RetryPolicy, StageOutcome, StageSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::gateway::{CommandOutput, RemoteGateway};
use crate::notify::{NotifyStatus, StatusNotifier};
use crate::retry::retry;

/// Stages the build tool knows about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// Build the release's container images.
    Build,
    IntegrationBuild,
    /// Fetch the shared integration images once per run.
    IntegrationDownload,
    Integration,
    Docs,
    Flake8,
    Pydocstyle,
    Mypy,
    Unit,
    DiffCoverage,
}

impl StageKind {
    /// Stage name used in outcomes and notification contexts.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Build => "build",
            StageKind::IntegrationBuild => "integration-build",
            StageKind::IntegrationDownload => "integration-download",
            StageKind::Integration => "integration",
            StageKind::Docs => "docs",
            StageKind::Flake8 => "flake8",
            StageKind::Pydocstyle => "pydocstyle",
            StageKind::Mypy => "mypy",
            StageKind::Unit => "unit",
            StageKind::DiffCoverage => "diff-coverage",
        }
    }

    /// Build-tool subcommand.
    pub fn subcommand(&self) -> &'static str {
        match self {
            StageKind::DiffCoverage => "diff_cover",
            other => other.name(),
        }
    }

    /// Flags that skip work an earlier stage of the same pipeline already did.
    pub fn skip_flags(&self) -> &'static [&'static str] {
        match self {
            StageKind::Build | StageKind::IntegrationDownload => &[],
            StageKind::IntegrationBuild
            | StageKind::Docs
            | StageKind::Flake8
            | StageKind::Pydocstyle
            | StageKind::Mypy
            | StageKind::Unit => &["--no-build"],
            StageKind::DiffCoverage | StageKind::Integration => &["--no-build", "--no-init"],
        }
    }

    /// Required stages abort their pipeline on failure.
    pub fn required(&self) -> bool {
        matches!(
            self,
            StageKind::Build | StageKind::IntegrationBuild | StageKind::IntegrationDownload
        )
    }

    /// Static-analysis stages that only run for the primary release.
    pub fn primary_only(&self) -> bool {
        matches!(
            self,
            StageKind::Flake8 | StageKind::Pydocstyle | StageKind::Mypy
        )
    }
}

/// Location and name of the build tool on the remote host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildTool {
    /// Executable, relative to `workdir` or absolute.
    pub program: String,
    /// Directory on the host where the payload was pushed.
    pub workdir: String,
}

impl Default for BuildTool {
    fn default() -> Self {
        Self {
            program: "devel/ci/ci-tool".to_string(),
            workdir: "/root/payload".to_string(),
        }
    }
}

/// Per-stage timeouts in minutes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageTimeouts {
    pub build_minutes: u64,
    pub check_minutes: u64,
    pub unit_minutes: u64,
    pub integration_minutes: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            build_minutes: 60,
            check_minutes: 20,
            unit_minutes: 60,
            integration_minutes: 120,
        }
    }
}

impl StageTimeouts {
    pub fn for_kind(&self, kind: StageKind) -> u64 {
        match kind {
            StageKind::Build | StageKind::IntegrationBuild | StageKind::IntegrationDownload => {
                self.build_minutes
            }
            StageKind::Docs | StageKind::Flake8 | StageKind::Pydocstyle | StageKind::Mypy => {
                self.check_minutes
            }
            StageKind::Unit | StageKind::DiffCoverage => self.unit_minutes,
            StageKind::Integration => self.integration_minutes,
        }
    }
}

/// Turns stage kinds into concrete build-tool invocations.
#[derive(Debug, Clone, Default)]
pub struct StageCatalog {
    pub tool: BuildTool,
    pub timeouts: StageTimeouts,
}

impl StageCatalog {
    pub fn new(tool: BuildTool, timeouts: StageTimeouts) -> Self {
        Self { tool, timeouts }
    }

    /// Spec for `kind`; `release` is `None` for run-wide setup stages.
    pub fn spec(&self, kind: StageKind, release: Option<&str>) -> StageSpec {
        let mut command = vec![self.tool.program.clone(), kind.subcommand().to_string()];
        if let Some(release) = release {
            command.push("--release".to_string());
            command.push(release.to_string());
        }
        command.extend(kind.skip_flags().iter().map(|f| f.to_string()));

        StageSpec {
            name: kind.name().to_string(),
            command,
            timeout_minutes: self.timeouts.for_kind(kind),
            required: kind.required(),
        }
    }
}

/// Runs one stage on the leased host with notifications and a timeout.
#[derive(Clone)]
pub struct StageRunner {
    gateway: Arc<dyn RemoteGateway>,
    notifier: Arc<dyn StatusNotifier>,
    workdir: String,
}

impl StageRunner {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        notifier: Arc<dyn StatusNotifier>,
        workdir: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            notifier,
            workdir: workdir.into(),
        }
    }

    /// Remote shell line for `stage`.
    pub fn render(&self, stage: &StageSpec) -> String {
        if self.workdir.is_empty() {
            stage.command_line()
        } else {
            format!("cd {} && {}", self.workdir, stage.command_line())
        }
    }

    /// Execute `stage` once and capture the result.
    ///
    /// Errors never escape: they land in the outcome's `error` field, and
    /// `StageOutcome::into_result` re-raises them for sequential callers.
    pub async fn run_stage(&self, lease: &NodeLease, release: &str, stage: &StageSpec) -> StageOutcome {
        let context = format!("{release}-{}", stage.name);
        self.post(&context, NotifyStatus::Pending).await;

        let started_at = Utc::now();
        let outcome = match self.execute(lease, release, stage).await {
            Ok(_) => StageOutcome::success(release, &stage.name, started_at),
            Err(err) => StageOutcome::failure(release, &stage.name, &err, started_at),
        };

        let status = if outcome.passed() {
            NotifyStatus::Success
        } else {
            NotifyStatus::Failure
        };
        self.post(&context, status).await;
        emit_stage_finished(&outcome);
        outcome
    }

    /// Execute `stage` under `policy`; the outcome records the attempts spent.
    pub async fn run_retried(
        &self,
        lease: &NodeLease,
        release: &str,
        stage: &StageSpec,
        policy: &RetryPolicy,
    ) -> StageOutcome {
        let started_at = Utc::now();
        let operation = format!("{release}-{}", stage.name);

        let result = retry(policy, &operation, |attempt| async move {
            self.run_stage(lease, release, stage)
                .await
                .with_attempts(attempt)
                .into_result()
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                let attempts = match &err {
                    MatrixError::RetryExhausted { attempts, .. } => *attempts,
                    _ => 1,
                };
                StageOutcome::failure(release, &stage.name, &err, started_at).with_attempts(attempts)
            }
        }
    }

    async fn execute(&self, lease: &NodeLease, release: &str, stage: &StageSpec) -> MatrixResult<CommandOutput> {
        if stage.command.is_empty() {
            return Err(MatrixError::Config(format!(
                "stage {} has empty command",
                stage.name
            )));
        }

        let line = self.render(stage);
        debug!(host = %lease.host_id, command = %line, "executing stage");

        if stage.timeout_minutes == 0 {
            return self.gateway.execute(lease, &line).await;
        }

        tokio::time::timeout(
            Duration::from_secs(stage.timeout_minutes.saturating_mul(60)),
            self.gateway.execute(lease, &line),
        )
        .await
        .map_err(|_| MatrixError::StageTimeout {
            release: release.to_string(),
            stage: stage.name.clone(),
            minutes: stage.timeout_minutes,
        })?
    }

    async fn post(&self, context: &str, status: NotifyStatus) {
        if let Err(e) = self.notifier.notify(context, status).await {
            warn!(context = %context, status = status.as_str(), error = %e, "status notification failed");
        }
    }
}
