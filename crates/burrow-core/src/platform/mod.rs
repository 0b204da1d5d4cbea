//! Platform abstraction layer for the three OS capabilities the supervisor needs.
//!
//! All `#[cfg]` blocks for OS-specific behavior live in this module:
//! - `process` - process table snapshots, detached spawning, termination
//! - `sockets` - socket table queries (is anything listening on a port?)
//! - `permissions` - executable bits for freshly extracted binaries
//!
//! The supervisor only talks to the [`OsSurface`] trait, so tests substitute
//! an in-memory fake without touching real processes.

pub mod permissions;
pub mod process;
pub mod sockets;

pub use permissions::set_executable;
pub use process::{is_process_alive, snapshot_processes, spawn_detached, terminate_process};
#[cfg(target_os = "linux")]
pub use sockets::listening_ports;
pub use sockets::{parse_proc_net, port_has_listener, SocketProtocol};

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Short process name as reported by the OS (may be truncated).
    pub name: String,
    /// Full argument vector, program first.
    pub args: Vec<String>,
}

impl ProcessEntry {
    /// Whether this process runs the executable called `binary_name`.
    ///
    /// Linux truncates the short name to 15 bytes, so argv[0] is checked too.
    pub fn is_instance_of(&self, binary_name: &str) -> bool {
        if binary_name.is_empty() {
            return false;
        }
        if self.name == binary_name {
            return true;
        }
        self.args
            .first()
            .and_then(|program| Path::new(program).file_name())
            .map(|file| file.to_string_lossy() == binary_name)
            .unwrap_or(false)
    }
}

/// Where a spawned child's stdout/stderr goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// Forward each line to the tracing log.
    Log,
    /// Append to a file.
    File(PathBuf),
}

/// Everything needed to launch a detached child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub output: OutputSink,
    /// Prefix for forwarded log lines.
    pub label: String,
}

/// OS process and socket tables, plus the ability to change them.
#[async_trait]
pub trait OsSurface: Send + Sync {
    /// Running processes that are instances of `binary_name`.
    async fn find_processes(&self, binary_name: &str) -> Result<Vec<ProcessEntry>>;

    /// Whether any socket is listening on (or bound to) `port`.
    async fn port_has_listener(&self, port: u16) -> Result<bool>;

    /// Launch a child that outlives the call; returns its pid once spawned.
    async fn spawn_detached(&self, request: SpawnRequest) -> Result<u32>;

    /// Ask `pid` to exit. A process that is already gone is not an error.
    async fn terminate(&self, pid: u32) -> Result<()>;
}

/// The real operating system.
#[derive(Debug, Clone)]
pub struct SystemSurface {
    stop_grace: Duration,
}

impl SystemSurface {
    pub fn new(stop_grace: Duration) -> Self {
        Self { stop_grace }
    }
}

impl Default for SystemSurface {
    fn default() -> Self {
        Self::new(crate::config::TunnelDefaults::STOP_GRACE_PERIOD)
    }
}

#[async_trait]
impl OsSurface for SystemSurface {
    async fn find_processes(&self, binary_name: &str) -> Result<Vec<ProcessEntry>> {
        let binary_name = binary_name.to_string();
        tokio::task::spawn_blocking(move || {
            snapshot_processes().map(|all| {
                all.into_iter()
                    .filter(|entry| entry.is_instance_of(&binary_name))
                    .collect()
            })
        })
        .await
        .map_err(crate::error::BurrowError::discovery)?
    }

    async fn port_has_listener(&self, port: u16) -> Result<bool> {
        tokio::task::spawn_blocking(move || sockets::port_has_listener(port))
            .await
            .map_err(crate::error::BurrowError::discovery)?
    }

    async fn spawn_detached(&self, request: SpawnRequest) -> Result<u32> {
        spawn_detached(request).await
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        terminate_process(pid, self.stop_grace).await
    }
}

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}
