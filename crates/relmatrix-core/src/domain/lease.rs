//! Ephemeral node lease handle.

use serde::{Deserialize, Serialize};

/// Lifecycle of a node lease.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    Unallocated,
    Allocated,
    Released,
}

/// Handle to a host handed out by the provisioning pool.
///
/// Every remote operation takes the lease explicitly; nothing reads the host
/// or session from ambient state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeLease {
    /// Hostname or address of the allocated machine.
    pub host_id: String,

    /// Pool session identifier used to give the host back.
    pub session_id: String,

    /// Current lifecycle state.
    pub state: LeaseState,
}

impl NodeLease {
    /// A lease that was handed out by the pool.
    pub fn allocated(host_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            session_id: session_id.into(),
            state: LeaseState::Allocated,
        }
    }

    /// Whether the lease still holds a pool session that must be released.
    pub fn needs_release(&self) -> bool {
        self.state == LeaseState::Allocated && !self.session_id.is_empty()
    }

    /// Mark the lease released. Returns `false` if it was not allocated.
    pub fn mark_released(&mut self) -> bool {
        if self.state != LeaseState::Allocated {
            return false;
        }
        self.state = LeaseState::Released;
        true
    }
}

impl Default for NodeLease {
    fn default() -> Self {
        Self {
            host_id: String::new(),
            session_id: String::new(),
            state: LeaseState::Unallocated,
        }
    }
}
