//! Data types shared between the supervisor, the store and the RPC layer.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Desired tunnel for one backing port. `tunnel_port == 0` disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TunnelMapping {
    pub target_port: u16,
    pub tunnel_port: u16,
}

impl TunnelMapping {
    pub fn new(target_port: u16, tunnel_port: u16) -> Self {
        Self {
            target_port,
            tunnel_port,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tunnel_port != 0
    }
}

/// Tunnel ports observed as bound by running tunnel processes.
pub type LiveProcessSet = HashSet<u16>;

/// The tunnel executable resolved at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelBinary {
    /// Full path to the executable.
    pub path: PathBuf,
    /// File name used to recognize running instances in the process table.
    pub name: String,
}

/// A running tunnel process, as read back from the process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveTunnel {
    pub pid: u32,
    pub tunnel_port: u16,
    /// Parsed from the forwarding argument; absent if it could not be read.
    pub target_port: Option<u16>,
}

/// What `start` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Spawned { pid: u32 },
    /// Something already listens on the tunnel port; nothing was spawned.
    AlreadyBound,
}

/// Result of an administrative `set`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOutcome {
    pub target_port: u16,
    pub tunnel_port: u16,
    /// Processes signalled for the previous tunnel.
    pub stopped: usize,
    pub started: Option<StartOutcome>,
}

/// Result of deleting a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOutcome {
    pub target_port: u16,
    /// Whether a mapping existed.
    pub removed: bool,
    /// Processes signalled for the deleted target.
    pub stopped: usize,
}

/// A start or stop that failed during a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub tunnel_port: u16,
    pub message: String,
}

/// Outcome of one batch of starts (init) or one reconciliation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub started: Vec<u16>,
    /// Ports whose start was skipped because something already listens there.
    pub already_bound: Vec<u16>,
    pub stopped: Vec<u16>,
    pub failed: Vec<BatchFailure>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty()
            && self.already_bound.is_empty()
            && self.stopped.is_empty()
            && self.failed.is_empty()
    }

    pub(crate) fn sort(&mut self) {
        self.started.sort_unstable();
        self.already_bound.sort_unstable();
        self.stopped.sort_unstable();
        self.failed.sort_by_key(|f| f.tunnel_port);
    }
}

/// Supervisor state for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub ready: bool,
    /// Set once `init` gave up on finding a binary; stays set for the run.
    pub disabled: bool,
    pub binary: Option<TunnelBinary>,
    pub sync_interval_secs: u64,
}

/// Desired mapping joined with what is actually running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelListing {
    pub target_port: u16,
    pub tunnel_port: u16,
    pub live: bool,
}

/// Desired mappings plus live ports nobody asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelOverview {
    pub tunnels: Vec<TunnelListing>,
    pub orphaned: Vec<u16>,
}
