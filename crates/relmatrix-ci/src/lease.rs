//! Node lease manager: acquire, configure and release the ephemeral host.

use std::sync::Arc;

use relmatrix_core::obs::{emit_lease_acquired, emit_lease_released};
use relmatrix_core::{MatrixError, MatrixResult, NodeLease, RetryPolicy};
use tracing::{info, warn};

use crate::gateway::RemoteGateway;
use crate::pool::{PoolApi, PoolRequest};
use crate::retry::retry;

/// Settings for acquiring and preparing a node.
#[derive(Debug, Clone)]
pub struct LeaseSettings {
    pub request: PoolRequest,
    /// Orchestrator-side policy around the pool call.
    pub allocation: RetryPolicy,
    /// Policy around the whole setup-command sequence.
    pub configuration: RetryPolicy,
    /// Commands installing the runtime dependencies on the host.
    pub setup_commands: Vec<String>,
}

/// Owns every interaction with the pool for one run.
pub struct NodeLeaseManager {
    pool: Arc<dyn PoolApi>,
    gateway: Arc<dyn RemoteGateway>,
    settings: LeaseSettings,
}

impl NodeLeaseManager {
    pub fn new(
        pool: Arc<dyn PoolApi>,
        gateway: Arc<dyn RemoteGateway>,
        settings: LeaseSettings,
    ) -> Self {
        Self {
            pool,
            gateway,
            settings,
        }
    }

    /// Acquire a host, retrying with the allocation policy.
    ///
    /// A session that comes back without a usable host is released right
    /// away and the attempt counts as failed.
    pub async fn acquire(&self) -> MatrixResult<NodeLease> {
        let result = retry(&self.settings.allocation, "node allocation", |attempt| async move {
            let allocation = self.pool.acquire(&self.settings.request).await?;

            match allocation.host() {
                Some(host) => Ok((NodeLease::allocated(host, &allocation.session_id), attempt)),
                None => {
                    let mut partial = NodeLease::allocated("", &allocation.session_id);
                    if let Err(e) = self.release(&mut partial).await {
                        warn!(session = %partial.session_id, error = %e, "failed to release partial lease");
                    }
                    Err(MatrixError::Pool(format!(
                        "session {} returned no usable host",
                        allocation.session_id
                    )))
                }
            }
        })
        .await;

        match result {
            Ok((lease, attempts)) => {
                emit_lease_acquired(&lease, attempts);
                Ok(lease)
            }
            Err(MatrixError::RetryExhausted {
                attempts,
                last_error,
                ..
            }) => Err(MatrixError::AllocationExhausted {
                pool: self.settings.request.pool.clone(),
                attempts,
                last_error,
            }),
            Err(e) => Err(e),
        }
    }

    /// Install runtime dependencies on the host.
    ///
    /// The sequence is one retry unit: a failing command restarts it from
    /// the first command.
    pub async fn configure(&self, lease: &NodeLease) -> MatrixResult<()> {
        let commands = &self.settings.setup_commands;
        if commands.is_empty() {
            return Ok(());
        }

        retry(&self.settings.configuration, "node configuration", |attempt| async move {
            info!(host = %lease.host_id, attempt, steps = commands.len(), "configuring node");
            for command in commands {
                self.gateway.execute(lease, command).await?;
            }
            Ok(())
        })
        .await
    }

    /// Give the host back to the pool.
    ///
    /// Attempted at most once per lease: the lease is marked released even
    /// when the pool call fails, and the failure is returned for the caller
    /// to report. Unallocated or already-released leases are a no-op.
    pub async fn release(&self, lease: &mut NodeLease) -> MatrixResult<()> {
        if !lease.needs_release() {
            return Ok(());
        }

        let result = self.pool.release(&lease.session_id).await;
        lease.mark_released();
        if result.is_ok() {
            emit_lease_released(lease);
        }
        result
    }
}
