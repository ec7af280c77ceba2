//! Domain models for relmatrix.
//!
//! - `NodeLease`: handle to the ephemeral host
//! - `RetryPolicy`: bounded fixed-interval retry settings
//! - `ReleaseTarget`: one release of the matrix
//! - `StageSpec` / `StageOutcome`: a build-tool invocation and its result
//! - `AggregatedOutcome`: the run-wide record

pub mod error;
pub mod lease;
pub mod outcome;
pub mod policy;
pub mod release;
pub mod stage;

pub use error::{FailureClass, MatrixError, MatrixResult};
pub use lease::{LeaseState, NodeLease};
pub use outcome::{AggregatedOutcome, OverallStatus, ReleaseOutcome};
pub use policy::RetryPolicy;
pub use release::ReleaseTarget;
pub use stage::{ErrorInfo, StageOutcome, StageSpec, StageStatus};
