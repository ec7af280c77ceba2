//! Matrix orchestrator: every release pipeline concurrently, then one
//! integration stage per release in configured order.

use std::sync::Arc;

use chrono::Utc;
use relmatrix_core::{AggregatedOutcome, MatrixError, NodeLease, ReleaseTarget, StageOutcome};
use tokio::sync::Mutex;
use tracing::{error, info, info_span, Instrument};

use crate::pipeline::ReleasePipeline;
use crate::stage::StageKind;

/// Stage name recorded when a release pipeline task dies before reporting.
pub const ABORTED_PIPELINE_STAGE: &str = "pipeline";

pub struct MatrixOrchestrator {
    pipeline: ReleasePipeline,
    releases: Vec<ReleaseTarget>,
}

impl MatrixOrchestrator {
    pub fn new(pipeline: ReleasePipeline, releases: Vec<ReleaseTarget>) -> Self {
        Self { pipeline, releases }
    }

    pub fn releases(&self) -> &[ReleaseTarget] {
        &self.releases
    }

    pub fn pipeline(&self) -> &ReleasePipeline {
        &self.pipeline
    }

    /// Run the whole matrix on `lease`.
    ///
    /// Never fails: failed stages and aborted pipelines are recorded in the
    /// returned aggregate, and the integration phase runs regardless of how
    /// the pipelines went.
    pub async fn run(&self, lease: &NodeLease) -> AggregatedOutcome {
        let aggregate = Arc::new(Mutex::new(AggregatedOutcome::new(&self.releases)));

        let mut tasks = Vec::with_capacity(self.releases.len());
        for release in &self.releases {
            let pipeline = self.pipeline.clone();
            let lease = lease.clone();
            let release = release.clone();
            let name = release.name.clone();
            let aggregate = Arc::clone(&aggregate);
            let span = info_span!("release", release = %name);

            let task = tokio::spawn(
                async move {
                    let report = pipeline.run(&lease, &release).await;
                    info!(state = ?report.state, stages = report.outcomes.len(), "release pipeline done");
                    aggregate.lock().await.extend(report.outcomes);
                }
                .instrument(span),
            );
            tasks.push((name, task));
        }

        for (release, task) in tasks {
            if let Err(e) = task.await {
                error!(release = %release, error = %e, "release pipeline task aborted");
                let err = MatrixError::Task(format!("pipeline for {release} aborted: {e}"));
                aggregate.lock().await.record(StageOutcome::failure(
                    &release,
                    ABORTED_PIPELINE_STAGE,
                    &err,
                    Utc::now(),
                ));
            }
        }

        let runner = self.pipeline.runner();
        for release in &self.releases {
            let spec = self
                .pipeline
                .catalog()
                .spec(StageKind::Integration, Some(&release.name));
            let outcome = runner.run_stage(lease, &release.name, &spec).await;
            aggregate.lock().await.record(outcome);
        }

        let outcome = aggregate.lock().await.clone();
        info!(
            passed = outcome.passed_count(),
            failed = outcome.failed_count(),
            overall = ?outcome.overall(),
            "matrix finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeGateway, RecordingNotifier};
    use crate::stage::{BuildTool, StageCatalog, StageRunner, StageTimeouts};
    use relmatrix_core::{OverallStatus, RetryPolicy};

    fn orchestrator(gateway: Arc<FakeGateway>, releases: Vec<ReleaseTarget>) -> MatrixOrchestrator {
        let runner = StageRunner::new(gateway, Arc::new(RecordingNotifier::new()), "/w");
        let catalog = StageCatalog::new(
            BuildTool {
                program: "ci-tool".to_string(),
                workdir: "/w".to_string(),
            },
            StageTimeouts::default(),
        );
        let pipeline = ReleasePipeline::new(runner, catalog, RetryPolicy::new(5, 10).unwrap());
        MatrixOrchestrator::new(pipeline, releases)
    }

    fn releases() -> Vec<ReleaseTarget> {
        vec![ReleaseTarget::new("f32"), ReleaseTarget::primary("pip")]
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_green_matrix() {
        let gateway = Arc::new(FakeGateway::new());
        let outcome = orchestrator(gateway.clone(), releases())
            .run(&NodeLease::allocated("n1", "s1"))
            .await;

        assert_eq!(outcome.overall(), OverallStatus::Success);
        assert!(outcome.ran("f32", "integration"));
        assert!(outcome.ran("pip", "integration"));
        assert!(!outcome.ran("f32", "mypy"));
        assert!(outcome.ran("pip", "mypy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_integration_runs_in_configured_order_after_pipelines() {
        let gateway = Arc::new(FakeGateway::new());
        orchestrator(gateway.clone(), releases())
            .run(&NodeLease::allocated("n1", "s1"))
            .await;

        let executed = gateway.executed();
        let integration: Vec<_> = executed
            .iter()
            .enumerate()
            .filter(|(_, c)| c.contains("ci-tool integration --release"))
            .collect();
        assert_eq!(integration.len(), 2);
        assert!(integration[0].1.contains("--release f32"));
        assert!(integration[1].1.contains("--release pip"));
        assert_eq!(integration[0].0, executed.len() - 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_integration_failure_is_additive() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_times("ci-tool integration --release f32", 1);

        let outcome = orchestrator(gateway.clone(), releases())
            .run(&NodeLease::allocated("n1", "s1"))
            .await;

        assert_eq!(outcome.overall(), OverallStatus::Failure);
        assert_eq!(outcome.failed_contexts(), vec!["f32-integration".to_string()]);
        assert_eq!(gateway.count_matching("ci-tool integration --release pip"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_pipeline_recorded_as_release_failure() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.panic_on("ci-tool build --release f32");

        let outcome = orchestrator(gateway.clone(), releases())
            .run(&NodeLease::allocated("n1", "s1"))
            .await;

        assert_eq!(outcome.overall(), OverallStatus::Failure);
        assert!(outcome.ran("f32", ABORTED_PIPELINE_STAGE));
        assert!(outcome.stages_for("pip").iter().all(StageOutcome::passed));
        assert!(outcome.ran("f32", "integration"));
    }
}
