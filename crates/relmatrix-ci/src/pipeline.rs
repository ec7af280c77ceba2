//! Per-release pipeline: required stages, then concurrent sub-stage branches.

use futures::future::join_all;
use relmatrix_core::{NodeLease, OverallStatus, ReleaseTarget, RetryPolicy, StageOutcome};
use serde::Serialize;
use tracing::{debug, info};

use crate::stage::{StageCatalog, StageKind, StageRunner};

/// Where a release pipeline is in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    BuildRequired,
    IntegrationBuildRequired,
    SubstagesRunning,
    Done(OverallStatus),
}

/// Stages a release will run, in scheduling order.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PipelinePlan {
    pub release: String,
    pub primary: bool,
    /// Run one after another, each retried; a failure ends the pipeline.
    pub required: Vec<StageKind>,
    /// Run concurrently; stages inside one branch run in order and stop at
    /// the first failure.
    pub branches: Vec<Vec<StageKind>>,
}

impl PipelinePlan {
    pub fn for_release(release: &ReleaseTarget) -> Self {
        let mut branches = vec![vec![StageKind::Docs]];
        if release.primary {
            branches.extend(
                [StageKind::Flake8, StageKind::Pydocstyle, StageKind::Mypy]
                    .into_iter()
                    .map(|kind| vec![kind]),
            );
        }
        branches.push(vec![StageKind::Unit, StageKind::DiffCoverage]);

        Self {
            release: release.name.clone(),
            primary: release.primary,
            required: vec![StageKind::Build, StageKind::IntegrationBuild],
            branches,
        }
    }

    /// Every stage kind in the plan.
    pub fn stages(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.required
            .iter()
            .chain(self.branches.iter().flatten())
            .copied()
    }
}

/// Outcome of one release pipeline.
#[derive(Debug, Clone)]
pub struct ReleaseReport {
    pub release: String,
    pub state: PipelineState,
    pub outcomes: Vec<StageOutcome>,
}

impl ReleaseReport {
    fn new(release: &str) -> Self {
        Self {
            release: release.to_string(),
            state: PipelineState::Idle,
            outcomes: Vec::new(),
        }
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(release = %self.release, from = ?self.state, to = ?next, "pipeline transition");
        self.state = next;
    }

    fn finish(mut self) -> Self {
        let status = if self.outcomes.iter().all(StageOutcome::passed) {
            OverallStatus::Success
        } else {
            OverallStatus::Failure
        };
        self.transition(PipelineState::Done(status));
        self
    }

    pub fn passed(&self) -> bool {
        self.state == PipelineState::Done(OverallStatus::Success)
    }
}

/// Runs the stage plan of one release.
#[derive(Clone)]
pub struct ReleasePipeline {
    runner: StageRunner,
    catalog: StageCatalog,
    required_policy: RetryPolicy,
}

impl ReleasePipeline {
    pub fn new(runner: StageRunner, catalog: StageCatalog, required_policy: RetryPolicy) -> Self {
        Self {
            runner,
            catalog,
            required_policy,
        }
    }

    pub fn runner(&self) -> &StageRunner {
        &self.runner
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// Run `release` to completion.
    ///
    /// A failed required stage ends the pipeline; sub-stage branches always
    /// all run, whatever their siblings do.
    pub async fn run(&self, lease: &NodeLease, release: &ReleaseTarget) -> ReleaseReport {
        let plan = PipelinePlan::for_release(release);
        let name = release.name.as_str();
        let mut report = ReleaseReport::new(name);

        for kind in &plan.required {
            report.transition(match kind {
                StageKind::Build => PipelineState::BuildRequired,
                _ => PipelineState::IntegrationBuildRequired,
            });

            let spec = self.catalog.spec(*kind, Some(name));
            let outcome = self
                .runner
                .run_retried(lease, name, &spec, &self.required_policy)
                .await;
            let passed = outcome.passed();
            report.outcomes.push(outcome);

            if !passed {
                info!(release = %name, stage = kind.name(), "required stage failed, skipping rest of release");
                return report.finish();
            }
        }

        report.transition(PipelineState::SubstagesRunning);
        let branches = plan
            .branches
            .iter()
            .map(|chain| self.run_chain(lease, name, chain));
        for outcomes in join_all(branches).await {
            report.outcomes.extend(outcomes);
        }

        report.finish()
    }

    async fn run_chain(&self, lease: &NodeLease, release: &str, chain: &[StageKind]) -> Vec<StageOutcome> {
        let mut outcomes = Vec::with_capacity(chain.len());
        for kind in chain {
            let spec = self.catalog.spec(*kind, Some(release));
            let outcome = self.runner.run_stage(lease, release, &spec).await;
            let passed = outcome.passed();
            outcomes.push(outcome);
            if !passed {
                break;
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeGateway, RecordingNotifier};
    use crate::stage::{BuildTool, StageTimeouts};
    use std::sync::Arc;
    use std::time::Duration;

    fn pipeline(gateway: Arc<FakeGateway>) -> ReleasePipeline {
        let runner = StageRunner::new(gateway, Arc::new(RecordingNotifier::new()), "/w");
        let catalog = StageCatalog::new(
            BuildTool {
                program: "ci-tool".to_string(),
                workdir: "/w".to_string(),
            },
            StageTimeouts::default(),
        );
        ReleasePipeline::new(runner, catalog, RetryPolicy::new(5, 10).unwrap())
    }

    fn stage_names(report: &ReleaseReport) -> Vec<&str> {
        report.outcomes.iter().map(|o| o.stage.as_str()).collect()
    }

    #[test]
    fn test_plan_primary_includes_checks() {
        let plan = PipelinePlan::for_release(&ReleaseTarget::primary("pip"));
        assert_eq!(plan.branches.len(), 5);
        assert!(plan.stages().any(|k| k == StageKind::Mypy));
    }

    #[test]
    fn test_plan_non_primary_omits_checks() {
        let plan = PipelinePlan::for_release(&ReleaseTarget::new("f32"));
        assert_eq!(
            plan.branches,
            vec![
                vec![StageKind::Docs],
                vec![StageKind::Unit, StageKind::DiffCoverage]
            ]
        );
        assert!(!plan.stages().any(|k| k.primary_only()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_primary_pipeline_succeeds() {
        let gateway = Arc::new(FakeGateway::new());
        let report = pipeline(gateway.clone())
            .run(&NodeLease::allocated("n1", "s1"), &ReleaseTarget::primary("pip"))
            .await;

        assert!(report.passed());
        assert_eq!(&stage_names(&report)[..2], &["build", "integration-build"]);
        assert_eq!(report.outcomes.len(), 8);
        assert_eq!(gateway.count_matching("ci-tool flake8 --release pip"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_failure_skips_integration_build() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_times("ci-tool build --release f32", u32::MAX);

        let report = pipeline(gateway.clone())
            .run(&NodeLease::allocated("n1", "s1"), &ReleaseTarget::new("f32"))
            .await;

        assert_eq!(report.state, PipelineState::Done(OverallStatus::Failure));
        assert_eq!(stage_names(&report), vec!["build"]);
        assert_eq!(report.outcomes[0].attempts, 5);
        assert_eq!(gateway.count_matching("integration-build"), 0);
        assert_eq!(gateway.count_matching("ci-tool docs"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_failure_skips_diff_coverage_only() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_times("ci-tool unit --release pip", 1);

        let report = pipeline(gateway.clone())
            .run(&NodeLease::allocated("n1", "s1"), &ReleaseTarget::primary("pip"))
            .await;

        assert!(!report.passed());
        assert_eq!(gateway.count_matching("diff_cover"), 0);
        assert_eq!(gateway.count_matching("ci-tool unit --release pip"), 1);
        let names = stage_names(&report);
        assert!(names.contains(&"docs"));
        assert!(names.contains(&"mypy"));
        assert!(!names.contains(&"diff-coverage"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sibling_failure_does_not_cancel_slow_branch() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_times("ci-tool docs --release pip", 1);
        gateway.delay("ci-tool unit --release pip", Duration::from_secs(600));

        let report = pipeline(gateway.clone())
            .run(&NodeLease::allocated("n1", "s1"), &ReleaseTarget::primary("pip"))
            .await;

        assert!(!report.passed());
        let unit = report.outcomes.iter().find(|o| o.stage == "unit").unwrap();
        assert!(unit.passed());
        assert_eq!(gateway.count_matching("diff_cover --release pip"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_substages_run_concurrently() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.delay("ci-tool docs", Duration::from_secs(300));
        gateway.delay("ci-tool unit", Duration::from_secs(300));
        let start = tokio::time::Instant::now();

        pipeline(gateway)
            .run(&NodeLease::allocated("n1", "s1"), &ReleaseTarget::new("f32"))
            .await;

        assert_eq!(start.elapsed(), Duration::from_secs(300));
    }
}
