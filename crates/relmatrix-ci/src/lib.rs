//! relmatrix CI - release matrix on an ephemeral remote host
//!
//! Provides an orchestrator that:
//! - Leases a host from a provisioning pool and always gives it back
//! - Runs one build-tool pipeline per release concurrently
//! - Runs the integration stage for every release, whatever failed before
//! - Pulls artifacts and publishes test reports on every exit path

pub mod config;
pub mod fakes;
pub mod finalize;
pub mod gateway;
pub mod lease;
pub mod matrix;
pub mod notify;
pub mod pipeline;
pub mod pool;
pub mod report;
pub mod retry;
pub mod stage;

// Re-export key types
pub use config::{MatrixConfig, NotifierKind, CONFIG_ENV};
pub use finalize::{MatrixRun, RunPaths, RunReport};
pub use gateway::{CommandOutput, RemoteGateway, SshGateway, SshProfile};
pub use lease::{LeaseSettings, NodeLeaseManager};
pub use matrix::MatrixOrchestrator;
pub use notify::{HttpStatusConfig, HttpStatusNotifier, LogNotifier, NotifyStatus, StatusNotifier};
pub use pipeline::{PipelinePlan, PipelineState, ReleasePipeline, ReleaseReport};
pub use pool::{HttpPoolClient, HttpPoolConfig, PoolAllocation, PoolApi, PoolRequest};
pub use report::{JunitDirectoryPublisher, ReportPublisher, ReportSummary};
pub use retry::{retry, retry_when};
pub use stage::{BuildTool, StageCatalog, StageKind, StageRunner, StageTimeouts};
