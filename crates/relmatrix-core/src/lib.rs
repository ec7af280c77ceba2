//! relmatrix core library
//!
//! Shared building blocks for the release-matrix orchestrator:
//! - Domain model: leases, retry policies, release targets, stage outcomes
//! - `MatrixError` taxonomy with failure classification
//! - Tracing initialisation and structured lifecycle events

pub mod domain;
pub mod obs;
pub mod telemetry;

pub use domain::{
    AggregatedOutcome, ErrorInfo, FailureClass, LeaseState, MatrixError, MatrixResult, NodeLease,
    OverallStatus, ReleaseOutcome, ReleaseTarget, RetryPolicy, StageOutcome, StageSpec, StageStatus,
};

pub use obs::{
    emit_finalize_error, emit_lease_acquired, emit_lease_released, emit_run_finished,
    emit_run_started, emit_stage_finished, run_span,
};
pub use telemetry::{init_tracing, LogFormat};

/// relmatrix version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
