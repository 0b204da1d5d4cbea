//! Starting and stopping tunnel processes.

use super::discovery::ProcessDiscovery;
use crate::config::{SupervisorConfig, TunnelDefaults};
use crate::error::{BurrowError, Result};
use crate::models::{StartOutcome, TunnelBinary};
use crate::platform::{OsSurface, OutputSink, SpawnRequest};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Launch parameters fixed for the lifetime of a supervisor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelLaunchConfig {
    pub binary: TunnelBinary,
    pub working_dir: PathBuf,
    pub listen_host: String,
    pub target_host: String,
    /// Transport flags, already rendered.
    pub transport_args: Vec<String>,
    pub log_dir: Option<PathBuf>,
}

impl TunnelLaunchConfig {
    /// Resolve launch parameters from configuration once, at startup.
    pub fn resolve(binary: TunnelBinary, config: &SupervisorConfig) -> Self {
        Self {
            binary,
            working_dir: config.install_dir.clone(),
            listen_host: config.transport.listen_host.clone(),
            target_host: config.transport.target_host.clone(),
            transport_args: config.transport.to_args(),
            log_dir: config.log_dir.clone(),
        }
    }

    /// Full argument list for one tunnel.
    pub fn args_for(&self, target_port: u16, tunnel_port: u16) -> Vec<String> {
        let mut args = vec![
            "-l".to_string(),
            format!("{}:{}", self.listen_host, tunnel_port),
            "-t".to_string(),
            format!("{}:{}", self.target_host, target_port),
        ];
        args.extend(self.transport_args.iter().cloned());
        args
    }

    fn spawn_request(&self, target_port: u16, tunnel_port: u16) -> SpawnRequest {
        let output = match self.log_dir {
            Some(ref dir) => OutputSink::File(dir.join(format!(
                "{}{}.log",
                TunnelDefaults::LOG_FILE_PREFIX,
                tunnel_port
            ))),
            None => OutputSink::Log,
        };

        SpawnRequest {
            program: self.binary.path.clone(),
            args: self.args_for(target_port, tunnel_port),
            working_dir: self.working_dir.clone(),
            output,
            label: format!("tunnel:{}->{}", tunnel_port, target_port),
        }
    }
}

/// Starts and stops tunnel processes. Holds no record of what it started.
#[derive(Clone)]
pub struct TunnelProcessController {
    os: Arc<dyn OsSurface>,
    discovery: ProcessDiscovery,
    launch: Arc<TunnelLaunchConfig>,
}

impl TunnelProcessController {
    pub fn new(os: Arc<dyn OsSurface>, launch: TunnelLaunchConfig) -> Self {
        let discovery = ProcessDiscovery::new(Arc::clone(&os), launch.binary.name.clone());
        Self {
            os,
            discovery,
            launch: Arc::new(launch),
        }
    }

    pub fn discovery(&self) -> &ProcessDiscovery {
        &self.discovery
    }

    pub fn launch_config(&self) -> &TunnelLaunchConfig {
        &self.launch
    }

    /// Start a tunnel on `tunnel_port` forwarding to `target_port`.
    ///
    /// If anything already holds `tunnel_port`, nothing is spawned. Returns as
    /// soon as the child is launched.
    pub async fn start(&self, target_port: u16, tunnel_port: u16) -> Result<StartOutcome> {
        if target_port == 0 {
            return Err(BurrowError::Validation {
                field: "target_port".into(),
                message: "must be greater than zero".into(),
            });
        }
        if tunnel_port == 0 {
            return Err(BurrowError::Validation {
                field: "tunnel_port".into(),
                message: "must be greater than zero".into(),
            });
        }

        if self.discovery.port_in_use(tunnel_port).await? {
            info!(
                "Port {} already in use, not starting tunnel for target port {}",
                tunnel_port, target_port
            );
            return Ok(StartOutcome::AlreadyBound);
        }

        let request = self.launch.spawn_request(target_port, tunnel_port);
        let pid = self
            .os
            .spawn_detached(request)
            .await
            .map_err(|e| BurrowError::Spawn {
                tunnel_port,
                message: e.to_string(),
            })?;

        info!(
            "Tunnel started on port {} for target port {} (pid {})",
            tunnel_port, target_port, pid
        );
        Ok(StartOutcome::Spawned { pid })
    }

    /// Stop every tunnel forwarding to `target_port`. Returns how many were signalled.
    pub async fn stop_by_target(&self, target_port: u16) -> Result<usize> {
        let pids = self.discovery.pids_for_target(target_port).await?;
        self.terminate_all(pids, "target", target_port).await
    }

    /// Stop every tunnel listening on `tunnel_port`. Returns how many were signalled.
    pub async fn stop_by_tunnel_port(&self, tunnel_port: u16) -> Result<usize> {
        let pids = self.discovery.pids_for_tunnel_port(tunnel_port).await?;
        self.terminate_all(pids, "tunnel", tunnel_port).await
    }

    /// Signal every pid; all are attempted even if some fail.
    async fn terminate_all(&self, pids: Vec<u32>, kind: &str, port: u16) -> Result<usize> {
        if pids.is_empty() {
            debug!("No tunnel running for {} port {}", kind, port);
            return Ok(0);
        }

        let results = join_all(pids.iter().map(|pid| self.os.terminate(*pid))).await;

        let mut stopped = 0;
        let mut first_error = None;
        for (pid, result) in pids.iter().zip(results) {
            match result {
                Ok(()) => {
                    stopped += 1;
                    info!("Tunnel stopped for {} port {} (pid {})", kind, port, pid);
                }
                Err(e) => {
                    warn!(
                        "Failed to stop tunnel for {} port {} (pid {}): {}",
                        kind, port, pid, e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(stopped),
        }
    }
}
