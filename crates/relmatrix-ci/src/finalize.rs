//! Finalization controller: the run entry point.
//!
//! Wraps acquire → configure → push → setup stage → matrix in a protected
//! block and always follows it with artifact pull, node release and report
//! publication, whatever the block did.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;

use relmatrix_core::obs::{emit_finalize_error, emit_run_finished, emit_run_started, run_span};
use relmatrix_core::{AggregatedOutcome, MatrixError, MatrixResult, NodeLease, OverallStatus, RetryPolicy};
use serde::Serialize;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::MatrixConfig;
use crate::gateway::RemoteGateway;
use crate::lease::NodeLeaseManager;
use crate::matrix::MatrixOrchestrator;
use crate::notify::StatusNotifier;
use crate::pipeline::ReleasePipeline;
use crate::pool::PoolApi;
use crate::report::{ReportPublisher, ReportSummary};
use crate::stage::{StageCatalog, StageKind, StageRunner};

/// Release label used for run-wide setup stages.
pub const SETUP_RELEASE: &str = "setup";

/// Paths the controller moves around the protected block.
#[derive(Debug, Clone)]
pub struct RunPaths {
    /// Local path pushed to the host before any stage.
    pub payload: PathBuf,
    /// Results path on the host, relative to the gateway's remote root.
    pub artifacts: PathBuf,
    /// Local directory the pulled results are published from.
    pub local_results: PathBuf,
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: AggregatedOutcome,
    pub reports: Option<ReportSummary>,
    pub duration_ms: u64,
}

/// What the finalization steps produced.
#[derive(Debug, Default)]
struct Cleanup {
    reports: Option<ReportSummary>,
    errors: Vec<String>,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

impl Cleanup {
    fn fail(&mut self, step: &str, err: &MatrixError) {
        emit_finalize_error(step, err);
        self.errors.push(format!("{step}: {err}"));
    }
}

pub struct MatrixRun {
    leases: NodeLeaseManager,
    gateway: Arc<dyn RemoteGateway>,
    publisher: Arc<dyn ReportPublisher>,
    orchestrator: MatrixOrchestrator,
    paths: RunPaths,
    setup_policy: RetryPolicy,
}

impl MatrixRun {
    pub fn new(
        leases: NodeLeaseManager,
        gateway: Arc<dyn RemoteGateway>,
        publisher: Arc<dyn ReportPublisher>,
        orchestrator: MatrixOrchestrator,
        paths: RunPaths,
        setup_policy: RetryPolicy,
    ) -> Self {
        Self {
            leases,
            gateway,
            publisher,
            orchestrator,
            paths,
            setup_policy,
        }
    }

    /// Wire a run from `config` and the external collaborators.
    pub fn from_config(
        config: &MatrixConfig,
        pool: Arc<dyn PoolApi>,
        gateway: Arc<dyn RemoteGateway>,
        notifier: Arc<dyn StatusNotifier>,
        publisher: Arc<dyn ReportPublisher>,
    ) -> Self {
        let leases = NodeLeaseManager::new(pool, Arc::clone(&gateway), config.lease_settings());
        let runner = StageRunner::new(
            Arc::clone(&gateway),
            notifier,
            config.build_tool.workdir.clone(),
        );
        let catalog = StageCatalog::new(config.build_tool.clone(), config.timeouts.clone());
        let pipeline = ReleasePipeline::new(runner, catalog, config.retry.stages);
        let orchestrator = MatrixOrchestrator::new(pipeline, config.releases.clone());
        let paths = RunPaths {
            payload: config.paths.payload.clone(),
            artifacts: config.paths.artifacts.clone(),
            local_results: config.paths.local_results(),
        };

        Self::new(
            leases,
            gateway,
            publisher,
            orchestrator,
            paths,
            config.retry.stages,
        )
    }

    /// Run the whole matrix with guaranteed cleanup.
    ///
    /// An error from the protected block wins over finalization errors,
    /// which are then only logged. A failed matrix is `MatrixFailed`; a
    /// panic inside the block is finalized like an error and returned as
    /// `Task`.
    pub async fn execute(&self) -> MatrixResult<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = run_span(&run_id);
        self.execute_inner(run_id).instrument(span).await
    }

    async fn execute_inner(&self, run_id: String) -> MatrixResult<RunReport> {
        let started = Instant::now();
        let names: Vec<String> = self
            .orchestrator
            .releases()
            .iter()
            .map(|r| r.name.clone())
            .collect();
        emit_run_started(&run_id, &names);

        let mut lease = None;
        let body = AssertUnwindSafe(self.protected(&mut lease))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(&*panic);
                error!(error = %message, "run aborted by panic, finalizing");
                Err(MatrixError::Task(format!("run aborted: {message}")))
            });
        let cleanup = self.finalize(lease.as_mut()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match body {
            Ok(outcome) => outcome,
            Err(err) => {
                emit_run_finished(&run_id, duration_ms, 0, false);
                return Err(err);
            }
        };

        let success =
            outcome.overall() == OverallStatus::Success && cleanup.errors.is_empty();
        emit_run_finished(&run_id, duration_ms, outcome.failed_count(), success);

        if let Some(first) = outcome.first_failure() {
            warn!(
                context = %first.context(),
                error = first.error.as_ref().map(|e| e.message.as_str()).unwrap_or(""),
                "first failed stage"
            );
        }
        outcome.to_result()?;
        if !cleanup.errors.is_empty() {
            return Err(MatrixError::Finalization {
                errors: cleanup.errors,
            });
        }

        Ok(RunReport {
            run_id,
            outcome,
            reports: cleanup.reports,
            duration_ms,
        })
    }

    async fn protected(&self, slot: &mut Option<NodeLease>) -> MatrixResult<AggregatedOutcome> {
        let lease: &NodeLease = slot.insert(self.leases.acquire().await?);

        self.leases.configure(lease).await?;
        self.gateway.push(lease, &self.paths.payload).await?;

        let pipeline = self.orchestrator.pipeline();
        let setup = pipeline.catalog().spec(StageKind::IntegrationDownload, None);
        pipeline
            .runner()
            .run_retried(lease, SETUP_RELEASE, &setup, &self.setup_policy)
            .await
            .into_result()?;

        Ok(self.orchestrator.run(lease).await)
    }

    async fn finalize(&self, lease: Option<&mut NodeLease>) -> Cleanup {
        let mut cleanup = Cleanup::default();

        match lease {
            Some(lease) => {
                if let Err(e) = self.gateway.pull(lease, &self.paths.artifacts).await {
                    cleanup.fail("pull", &e);
                }
                if let Err(e) = self.leases.release(lease).await {
                    cleanup.fail("release", &e);
                }
            }
            None => info!("no node was leased, skipping artifact pull and release"),
        }

        match self.publisher.publish(&self.paths.local_results).await {
            Ok(summary) => cleanup.reports = Some(summary),
            Err(e) => cleanup.fail("publish", &e),
        }

        cleanup
    }
}
