//! Shared fixtures: an in-memory OS and a supervisor wired to it.

#![allow(dead_code)]

use async_trait::async_trait;
use burrow_core::process::parse_listen_port;
use burrow_core::{
    BurrowError, OsSurface, ProcessEntry, Result, SpawnRequest, SqliteMappingStore, Supervisor,
    SupervisorConfig,
};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const BINARY_NAME: &str = "server_linux_amd64";

#[derive(Default)]
struct FakeState {
    next_pid: u32,
    processes: Vec<ProcessEntry>,
    foreign_listeners: HashSet<u16>,
    spawned: Vec<SpawnRequest>,
    terminated: Vec<u32>,
    fail_discovery: bool,
    fail_spawn_on: HashSet<u16>,
}

/// Process and socket tables held in memory.
///
/// A spawned tunnel immediately shows up in the process table and holds its
/// listen port, the way a real tunnel does a moment after launch.
#[derive(Default)]
pub struct FakeOs {
    state: Mutex<FakeState>,
}

impl FakeOs {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_pid: 1000,
                ..Default::default()
            }),
        }
    }

    /// Put a tunnel process in the table that the supervisor did not start.
    pub fn add_tunnel(&self, tunnel_port: u16, target_port: u16) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.next_pid += 1;
        let pid = state.next_pid;
        state.processes.push(ProcessEntry {
            pid,
            name: BINARY_NAME.to_string(),
            args: vec![
                format!("/opt/kcptun/{}", BINARY_NAME),
                "-l".into(),
                format!(":{}", tunnel_port),
                "-t".into(),
                format!("0.0.0.0:{}", target_port),
            ],
        });
        pid
    }

    /// Simulate a tunnel dying outside the supervisor's control.
    pub fn kill_tunnel_on(&self, tunnel_port: u16) {
        let mut state = self.state.lock().unwrap();
        state
            .processes
            .retain(|p| parse_listen_port(&p.args) != Some(tunnel_port));
    }

    /// Something other than a tunnel holds `port`.
    pub fn occupy_port(&self, port: u16) {
        self.state.lock().unwrap().foreign_listeners.insert(port);
    }

    pub fn fail_discovery(&self, fail: bool) {
        self.state.lock().unwrap().fail_discovery = fail;
    }

    pub fn fail_spawn_on(&self, tunnel_port: u16) {
        self.state.lock().unwrap().fail_spawn_on.insert(tunnel_port);
    }

    pub fn live_ports(&self) -> BTreeSet<u16> {
        self.state
            .lock()
            .unwrap()
            .processes
            .iter()
            .filter_map(|p| parse_listen_port(&p.args))
            .collect()
    }

    /// Number of processes listening on `tunnel_port`.
    pub fn instances_on(&self, tunnel_port: u16) -> usize {
        self.state
            .lock()
            .unwrap()
            .processes
            .iter()
            .filter(|p| parse_listen_port(&p.args) == Some(tunnel_port))
            .count()
    }

    pub fn spawned(&self) -> Vec<SpawnRequest> {
        self.state.lock().unwrap().spawned.clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.state.lock().unwrap().terminated.clone()
    }

    pub fn side_effects(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.spawned.len() + state.terminated.len()
    }
}

#[async_trait]
impl OsSurface for FakeOs {
    async fn find_processes(&self, binary_name: &str) -> Result<Vec<ProcessEntry>> {
        let state = self.state.lock().unwrap();
        if state.fail_discovery {
            return Err(BurrowError::discovery("process table unavailable"));
        }
        Ok(state
            .processes
            .iter()
            .filter(|p| p.is_instance_of(binary_name))
            .cloned()
            .collect())
    }

    async fn port_has_listener(&self, port: u16) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if state.fail_discovery {
            return Err(BurrowError::discovery("socket table unavailable"));
        }
        Ok(state.foreign_listeners.contains(&port)
            || state
                .processes
                .iter()
                .any(|p| parse_listen_port(&p.args) == Some(port)))
    }

    async fn spawn_detached(&self, request: SpawnRequest) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        let mut args = vec![request.program.to_string_lossy().into_owned()];
        args.extend(request.args.iter().cloned());

        if let Some(port) = parse_listen_port(&args) {
            if state.fail_spawn_on.contains(&port) {
                return Err(BurrowError::Other("exec format error".into()));
            }
        }

        state.next_pid += 1;
        let pid = state.next_pid;
        let name = request
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        state.processes.push(ProcessEntry { pid, name, args });
        state.spawned.push(request);
        Ok(pid)
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.processes.retain(|p| p.pid != pid);
        state.terminated.push(pid);
        Ok(())
    }
}

/// A supervisor over a fake OS, an in-memory store and a temp install dir.
pub struct Harness {
    pub supervisor: Arc<Supervisor>,
    pub os: Arc<FakeOs>,
    pub store: SqliteMappingStore,
    pub install_dir: TempDir,
}

impl Harness {
    /// `mappings` are `(target_port, tunnel_port)` pairs to seed the store with.
    pub async fn new(mappings: &[(u16, u16)]) -> Self {
        Self::build(mappings, true).await
    }

    /// Same as [`Harness::new`] but the install dir holds no tunnel binary.
    pub async fn without_binary(mappings: &[(u16, u16)]) -> Self {
        Self::build(mappings, false).await
    }

    async fn build(mappings: &[(u16, u16)], with_binary: bool) -> Self {
        use burrow_core::MappingStore;

        let install_dir = TempDir::new().unwrap();
        if with_binary {
            write_binary(install_dir.path());
        }

        let store = SqliteMappingStore::open_in_memory().unwrap();
        for (target, tunnel) in mappings {
            store.register_target(*target).unwrap();
            store.update(*target, *tunnel).await.unwrap();
        }

        let os = Arc::new(FakeOs::new());
        let config = SupervisorConfig {
            install_dir: install_dir.path().to_path_buf(),
            ..Default::default()
        };
        let supervisor = Arc::new(Supervisor::new(
            Arc::new(store.clone()),
            Arc::clone(&os) as Arc<dyn OsSurface>,
            config,
        ));

        Self {
            supervisor,
            os,
            store,
            install_dir,
        }
    }

    /// Run `init` and wait for its start batch.
    pub async fn init(&self) -> burrow_core::SyncReport {
        match self.supervisor.init() {
            burrow_core::InitStatus::Started(handle) => handle.await.unwrap(),
            other => panic!("expected init to start, got {:?}", other),
        }
    }
}

fn write_binary(dir: &Path) {
    std::fs::write(dir.join(BINARY_NAME), b"#!/bin/sh\n").unwrap();
}
