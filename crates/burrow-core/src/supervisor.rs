//! Tunnel supervisor: keeps live tunnel processes in line with stored mappings.
//!
//! The store holds desired state and the OS process table holds live state.
//! Nothing in between is cached, so every operation re-derives what is
//! running before acting on it.

use crate::bootstrap;
use crate::config::SupervisorConfig;
use crate::error::{BurrowError, Result};
use crate::models::{
    BatchFailure, LiveTunnel, RemoveOutcome, SetOutcome, StartOutcome, SupervisorStatus,
    SyncReport, TunnelListing, TunnelMapping, TunnelOverview,
};
use crate::platform::OsSurface;
use crate::process::{TunnelLaunchConfig, TunnelProcessController};
use crate::store::MappingStore;
use futures::future::{join, join_all};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What `init` did.
#[derive(Debug)]
pub enum InitStatus {
    /// No tunnel binary was found; tunnels stay off until restart.
    Disabled,
    /// Ready. The handle resolves once every stored tunnel has been started.
    Started(JoinHandle<SyncReport>),
    /// `init` had already run.
    AlreadyInitialized,
}

/// Orchestrates `init`, `set` and `sync_status`.
pub struct Supervisor {
    store: Arc<dyn MappingStore>,
    os: Arc<dyn OsSurface>,
    config: SupervisorConfig,
    /// Set exactly once by a successful `init`; its presence is the ready flag.
    controller: OnceLock<TunnelProcessController>,
    disabled: AtomicBool,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn MappingStore>,
        os: Arc<dyn OsSurface>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            store,
            os,
            config,
            controller: OnceLock::new(),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.controller.get().is_some()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Resolve the tunnel binary and start every enabled mapping.
    ///
    /// Never fails: a missing binary disables tunnels for the rest of the
    /// run. Starts run in a background task so the caller is not held up by
    /// slow spawns.
    pub fn init(&self) -> InitStatus {
        if self.is_ready() {
            debug!("Supervisor already initialized");
            return InitStatus::AlreadyInitialized;
        }
        if self.is_disabled() {
            return InitStatus::Disabled;
        }

        let binary =
            match bootstrap::resolve_binary(&self.config.install_dir, &self.config.binary_pattern) {
                Ok(Some(binary)) => binary,
                Ok(None) => {
                    warn!(
                        "No tunnel binary matching '{}' in {}; tunnels disabled",
                        self.config.binary_pattern,
                        self.config.install_dir.display()
                    );
                    self.disabled.store(true, Ordering::SeqCst);
                    return InitStatus::Disabled;
                }
                Err(e) => {
                    error!("Failed to resolve tunnel binary: {}; tunnels disabled", e);
                    self.disabled.store(true, Ordering::SeqCst);
                    return InitStatus::Disabled;
                }
            };

        info!("Using tunnel binary {}", binary.path.display());
        let launch = TunnelLaunchConfig::resolve(binary, &self.config);
        let controller = TunnelProcessController::new(Arc::clone(&self.os), launch);
        if self.controller.set(controller.clone()).is_err() {
            return InitStatus::AlreadyInitialized;
        }

        let store = Arc::clone(&self.store);
        InitStatus::Started(tokio::spawn(async move {
            let mappings = match store.get().await {
                Ok(mappings) => mappings,
                Err(e) => {
                    error!("Failed to read tunnel mappings at startup: {}", e);
                    return SyncReport::default();
                }
            };

            let enabled: Vec<TunnelMapping> =
                mappings.into_iter().filter(TunnelMapping::is_enabled).collect();
            info!("Starting {} stored tunnel(s)", enabled.len());

            let mut report = SyncReport::default();
            record_starts(&mut report, start_each(&controller, &enabled).await);
            report.sort();
            report
        }))
    }

    /// Change the tunnel port of `target_port` and converge its process now.
    ///
    /// The new port is persisted before any process is touched. `tunnel_port`
    /// of zero disables the tunnel.
    pub async fn set(&self, target_port: u16, tunnel_port: u16) -> Result<SetOutcome> {
        let controller = self.controller.get().ok_or(BurrowError::NotReady)?;

        let rows = self.store.update(target_port, tunnel_port).await?;
        if rows == 0 {
            return Err(BurrowError::MappingNotFound { target_port });
        }
        debug!("Stored tunnel port {} for target port {}", tunnel_port, target_port);

        let stopped = controller.stop_by_target(target_port).await?;
        let started = if tunnel_port != 0 {
            Some(controller.start(target_port, tunnel_port).await?)
        } else {
            info!("Tunnel disabled for target port {}", target_port);
            None
        };

        Ok(SetOutcome {
            target_port,
            tunnel_port,
            stopped,
            started,
        })
    }

    /// Delete the mapping for `target_port` and stop its tunnel now.
    ///
    /// Before `init` only the mapping is deleted.
    pub async fn remove_target(&self, target_port: u16) -> Result<RemoveOutcome> {
        let removed = self.store.remove(target_port).await?;

        let stopped = match self.controller.get() {
            Some(controller) if removed => controller.stop_by_target(target_port).await?,
            _ => 0,
        };
        if removed {
            info!(
                "Removed target port {} ({} tunnel(s) stopped)",
                target_port, stopped
            );
        }

        Ok(RemoveOutcome {
            target_port,
            removed,
            stopped,
        })
    }

    /// One reconciliation pass.
    ///
    /// Starts every enabled mapping whose port is not live, stops every live
    /// tunnel no mapping asks for, and restarts tunnels that hold a mapped
    /// port but forward to a different target. Returns `None` before `init`.
    /// A failed store or discovery read aborts the pass before any start or
    /// stop.
    pub async fn sync_status(&self) -> Result<Option<SyncReport>> {
        let Some(controller) = self.controller.get() else {
            debug!("sync_status skipped, supervisor not ready");
            return Ok(None);
        };

        let desired: Vec<TunnelMapping> = self
            .store
            .get()
            .await?
            .into_iter()
            .filter(TunnelMapping::is_enabled)
            .collect();
        let tunnels = controller.discovery().list_tunnels().await?;

        let live: HashSet<u16> = tunnels.iter().map(|t| t.tunnel_port).collect();
        let misrouted = misrouted_ports(&tunnels, &desired);
        let desired_ports: HashSet<u16> = desired.iter().map(|m| m.tunnel_port).collect();

        let (to_start, to_restart): (Vec<TunnelMapping>, Vec<TunnelMapping>) = desired
            .into_iter()
            .filter(|m| !live.contains(&m.tunnel_port) || misrouted.contains(&m.tunnel_port))
            .partition(|m| !live.contains(&m.tunnel_port));
        let to_stop: Vec<u16> = live.difference(&desired_ports).copied().collect();

        if to_start.is_empty() && to_restart.is_empty() && to_stop.is_empty() {
            debug!("Tunnels in sync ({} live)", live.len());
            return Ok(Some(SyncReport::default()));
        }

        let ((starts, restarts), stops) = join(
            join(
                start_each(controller, &to_start),
                restart_each(controller, &to_restart),
            ),
            stop_each(controller, &to_stop),
        )
        .await;

        let mut report = SyncReport::default();
        record_starts(&mut report, starts);
        record_stops(&mut report, stops);
        for (port, result) in restarts {
            match result {
                Ok((stopped, outcome)) => {
                    if stopped > 0 {
                        report.stopped.push(port);
                    }
                    record_starts(&mut report, vec![(port, Ok(outcome))]);
                }
                Err(e) => record_starts(&mut report, vec![(port, Err(e))]),
            }
        }
        report.sort();
        Ok(Some(report))
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            ready: self.is_ready(),
            disabled: self.is_disabled(),
            binary: self
                .controller
                .get()
                .map(|c| c.launch_config().binary.clone()),
            sync_interval_secs: self.config.sync_interval_secs,
        }
    }

    /// Stored mappings joined with live state.
    ///
    /// Before `init`, nothing is reported as live.
    pub async fn list_tunnels(&self) -> Result<TunnelOverview> {
        let mappings = self.store.get().await?;
        let tunnels = match self.controller.get() {
            Some(controller) => controller.discovery().list_tunnels().await?,
            None => Vec::new(),
        };

        let enabled: Vec<TunnelMapping> =
            mappings.iter().copied().filter(TunnelMapping::is_enabled).collect();
        let misrouted = misrouted_ports(&tunnels, &enabled);
        let live: HashSet<u16> = tunnels.iter().map(|t| t.tunnel_port).collect();
        let desired_ports: HashSet<u16> = enabled.iter().map(|m| m.tunnel_port).collect();
        let mut orphaned: Vec<u16> = live.difference(&desired_ports).copied().collect();
        orphaned.sort_unstable();

        let tunnels = mappings
            .into_iter()
            .map(|m| TunnelListing {
                target_port: m.target_port,
                tunnel_port: m.tunnel_port,
                live: m.is_enabled()
                    && live.contains(&m.tunnel_port)
                    && !misrouted.contains(&m.tunnel_port),
            })
            .collect();

        Ok(TunnelOverview { tunnels, orphaned })
    }
}

async fn start_each(
    controller: &TunnelProcessController,
    mappings: &[TunnelMapping],
) -> Vec<(u16, Result<StartOutcome>)> {
    join_all(mappings.iter().map(|m| async move {
        (m.tunnel_port, controller.start(m.target_port, m.tunnel_port).await)
    }))
    .await
}

async fn stop_each(
    controller: &TunnelProcessController,
    ports: &[u16],
) -> Vec<(u16, Result<usize>)> {
    join_all(ports.iter().map(|port| async move {
        info!("Stopping tunnel on port {}, no mapping wants it", port);
        (*port, controller.stop_by_tunnel_port(*port).await)
    }))
    .await
}

/// Stop whatever holds each mapping's port, then start the mapping.
async fn restart_each(
    controller: &TunnelProcessController,
    mappings: &[TunnelMapping],
) -> Vec<(u16, Result<(usize, StartOutcome)>)> {
    join_all(mappings.iter().map(|m| async move {
        warn!(
            "Tunnel on port {} forwards to the wrong target, restarting for target port {}",
            m.tunnel_port, m.target_port
        );
        let result = async {
            let stopped = controller.stop_by_tunnel_port(m.tunnel_port).await?;
            let outcome = controller.start(m.target_port, m.tunnel_port).await?;
            Ok((stopped, outcome))
        }
        .await;
        (m.tunnel_port, result)
    }))
    .await
}

/// Mapped ports held by a tunnel that forwards somewhere else.
///
/// A tunnel whose target could not be parsed is assumed correct.
fn misrouted_ports(tunnels: &[LiveTunnel], desired: &[TunnelMapping]) -> HashSet<u16> {
    let wanted: HashMap<u16, u16> = desired
        .iter()
        .map(|m| (m.tunnel_port, m.target_port))
        .collect();

    tunnels
        .iter()
        .filter_map(|tunnel| {
            let expected = wanted.get(&tunnel.tunnel_port)?;
            match tunnel.target_port {
                Some(actual) if actual != *expected => Some(tunnel.tunnel_port),
                _ => None,
            }
        })
        .collect()
}

fn record_stops(report: &mut SyncReport, results: Vec<(u16, Result<usize>)>) {
    for (port, result) in results {
        match result {
            Ok(0) => {}
            Ok(_) => report.stopped.push(port),
            Err(e) => report.failed.push(BatchFailure {
                tunnel_port: port,
                message: e.to_string(),
            }),
        }
    }
}

fn record_starts(report: &mut SyncReport, results: Vec<(u16, Result<StartOutcome>)>) {
    for (port, result) in results {
        match result {
            Ok(StartOutcome::Spawned { .. }) => report.started.push(port),
            Ok(StartOutcome::AlreadyBound) => report.already_bound.push(port),
            Err(e) => {
                warn!("Failed to start tunnel on port {}: {}", port, e);
                report.failed.push(BatchFailure {
                    tunnel_port: port,
                    message: e.to_string(),
                });
            }
        }
    }
}
