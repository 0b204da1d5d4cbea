//! Platform-specific process management.
//!
//! Process table snapshots come from `sysinfo`; signals go through `nix` on
//! Unix and `taskkill` on Windows.

use super::{OutputSink, ProcessEntry, SpawnRequest};
use crate::error::{BurrowError, Result};
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Take a fresh snapshot of the process table.
///
/// Nothing is cached between calls. Threads and zombies are skipped.
pub fn snapshot_processes() -> Result<Vec<ProcessEntry>> {
    if !sysinfo::IS_SUPPORTED_SYSTEM {
        return Err(BurrowError::discovery(
            "process table is not available on this platform",
        ));
    }

    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::new().with_cmd(UpdateKind::Always),
    );

    let entries: Vec<ProcessEntry> = system
        .processes()
        .iter()
        .filter(|(_, process)| {
            process.thread_kind().is_none() && process.status() != ProcessStatus::Zombie
        })
        .map(|(pid, process)| ProcessEntry {
            pid: pid.as_u32(),
            name: process.name().to_string_lossy().into_owned(),
            args: process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
        })
        .collect();

    // An empty table means /proc (or equivalent) was unreadable; we are running.
    if entries.is_empty() {
        return Err(BurrowError::discovery("process table snapshot was empty"));
    }

    debug!("snapshot_processes: {} processes", entries.len());
    Ok(entries)
}

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: `kill(pid, 0)`
/// - **Windows**: process table lookup
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match i32::try_from(pid) {
            Ok(raw) => match kill(Pid::from_raw(raw), None) {
                Ok(()) => true,
                // Exists but belongs to someone else.
                Err(nix::errno::Errno::EPERM) => true,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        let mut system = System::new();
        let sys_pid = sysinfo::Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        system.process(sys_pid).is_some()
    }
}

/// Terminate a process gracefully, then forcefully if needed.
///
/// # Platform Behavior
/// - **Linux/macOS**: SIGTERM, poll for up to `grace`, then SIGKILL
/// - **Windows**: `taskkill /PID {pid} /F /T`
pub async fn terminate_process(pid: u32, grace: Duration) -> Result<()> {
    if !is_process_alive(pid) {
        debug!("Process {} is not running", pid);
        return Ok(());
    }

    #[cfg(unix)]
    {
        terminate_process_unix(pid, grace).await
    }

    #[cfg(windows)]
    {
        let _ = grace;
        terminate_process_windows(pid).await
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = grace;
        Err(BurrowError::Terminate {
            pid,
            message: "process termination not implemented for this platform".into(),
        })
    }
}

#[cfg(unix)]
async fn terminate_process_unix(pid: u32, grace: Duration) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| BurrowError::Terminate {
        pid,
        message: "pid out of range".into(),
    })?;
    let nix_pid = Pid::from_raw(raw);

    debug!("Sending SIGTERM to process {}", pid);
    match kill(nix_pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(()),
        Err(e) => {
            return Err(BurrowError::Terminate {
                pid,
                message: format!("SIGTERM: {}", e),
            })
        }
    }

    let iterations = (grace.as_millis() / EXIT_POLL_INTERVAL.as_millis()).max(1);
    for _ in 0..iterations {
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        if !is_process_alive(pid) {
            debug!("Process {} terminated gracefully", pid);
            return Ok(());
        }
    }

    debug!("Process {} still running, sending SIGKILL", pid);
    match kill(nix_pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(BurrowError::Terminate {
            pid,
            message: format!("SIGKILL: {}", e),
        }),
    }
}

#[cfg(windows)]
async fn terminate_process_windows(pid: u32) -> Result<()> {
    debug!("Terminating process {} with taskkill", pid);

    let output = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F", "/T"])
        .output()
        .await
        .map_err(|e| BurrowError::Terminate {
            pid,
            message: format!("failed to run taskkill: {}", e),
        })?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    // "not found" means it already exited
    if stderr.contains("not found") || stderr.contains("not running") {
        Ok(())
    } else {
        Err(BurrowError::Terminate {
            pid,
            message: stderr.trim().to_string(),
        })
    }
}

/// Spawn a child in its own process group and return its pid.
///
/// The call does not wait for the child. A background task reaps it and logs
/// the exit status; when output goes to the log, two more tasks forward lines.
pub async fn spawn_detached(request: SpawnRequest) -> Result<u32> {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .current_dir(&request.working_dir)
        .stdin(Stdio::null())
        .kill_on_drop(false);

    // Keep the tunnel out of our process group so Ctrl+C on the supervisor
    // does not take the tunnels down with it.
    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    match request.output {
        OutputSink::File(ref path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BurrowError::io_with_path(e, parent))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| BurrowError::io_with_path(e, path))?;
            let stderr_file = file
                .try_clone()
                .map_err(|e| BurrowError::io_with_path(e, path))?;
            cmd.stdout(Stdio::from(file));
            cmd.stderr(Stdio::from(stderr_file));
        }
        OutputSink::Log => {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        }
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| BurrowError::io_with_path(e, &request.program))?;
    let pid = child
        .id()
        .ok_or_else(|| BurrowError::Other("spawned child exited before reporting a pid".into()))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(stdout, request.label.clone(), false));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(stderr, request.label.clone(), true));
    }

    let label = request.label;
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => info!("[{}] exited", label),
            Ok(status) => warn!("[{}] exited with {}", label, status),
            Err(e) => warn!("[{}] wait failed: {}", label, e),
        }
    });

    Ok(pid)
}

async fn forward_output<R>(reader: R, label: String, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!("[{}] {}", label, line),
            Ok(Some(line)) => info!("[{}] {}", label, line),
            Ok(None) => break,
            Err(e) => {
                debug!("[{}] output stream closed: {}", label, e);
                break;
            }
        }
    }
}
