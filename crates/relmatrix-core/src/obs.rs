//! Structured observability hooks for the run lifecycle.
//!
//! - Run-scoped tracing span via [`run_span`]
//! - `emit_*` functions for lease, stage and run events
//!
//! Events are emitted at `info!` (failures at `warn!`), filtered through
//! `RELMATRIX_LOG`.

use tracing::{info, warn};

use crate::domain::{NodeLease, StageOutcome};

/// Run-scoped span tagged with the run id.
///
/// Attach it to the driving future with `tracing::Instrument`; spawned
/// release tasks nest their own spans under it.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("relmatrix.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, releases: &[String]) {
    info!(event = "run.started", run_id = %run_id, releases = ?releases);
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, failed_stages: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        failed_stages = failed_stages,
        success = success,
    );
}

pub fn emit_lease_acquired(lease: &NodeLease, attempts: u32) {
    info!(
        event = "lease.acquired",
        host = %lease.host_id,
        session = %lease.session_id,
        attempts = attempts,
    );
}

pub fn emit_lease_released(lease: &NodeLease) {
    info!(event = "lease.released", host = %lease.host_id, session = %lease.session_id);
}

/// Stage completion; failures go out at `warn!` with the captured error.
pub fn emit_stage_finished(outcome: &StageOutcome) {
    match &outcome.error {
        None => info!(
            event = "stage.finished",
            context = %outcome.context(),
            attempts = outcome.attempts,
            duration_ms = outcome.duration_ms(),
            success = true,
        ),
        Some(err) => warn!(
            event = "stage.finished",
            context = %outcome.context(),
            attempts = outcome.attempts,
            duration_ms = outcome.duration_ms(),
            success = false,
            error = %err.message,
        ),
    }
}

/// Finalization step error (never raised over a pending failure).
pub fn emit_finalize_error(step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "finalize.error", step = %step, error = %error);
}
