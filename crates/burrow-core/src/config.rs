//! Centralized configuration for Burrow.
//!
//! Compile-time defaults live in unit structs; the runtime [`SupervisorConfig`]
//! is read from a JSON file and every field falls back to those defaults.

use crate::error::{BurrowError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunnel process defaults.
pub struct TunnelDefaults;

impl TunnelDefaults {
    pub const INSTALL_DIR_NAME: &'static str = "kcptun";
    pub const BINARY_PATTERN: &'static str = "server";
    pub const SYNC_INTERVAL: Duration = Duration::from_secs(60);
    pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);
    pub const LISTEN_HOST: &'static str = "";
    pub const TARGET_HOST: &'static str = "0.0.0.0";
    pub const CRYPT: &'static str = "aes";
    pub const MTU: u32 = 1350;
    pub const MODE: &'static str = "fast";
    pub const DSCP: u32 = 0;
    pub const LOG_FILE_PREFIX: &'static str = "tunnel-";
}

/// SQLite store tuning.
pub struct StoreConfig;

impl StoreConfig {
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_DB_FILENAME: &'static str = "burrow.db";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const DOWNLOAD_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
}

/// Transport options handed to every tunnel process.
///
/// Resolved into an argument list once when the supervisor is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    pub crypt: String,
    pub mtu: u32,
    pub mode: String,
    pub dscp: u32,
    pub nocomp: bool,
    /// Pre-shared key; omitted from the command line when unset.
    pub key: Option<String>,
    /// Host part of the listen address (`-l <host>:<port>`). Empty binds all.
    pub listen_host: String,
    /// Host the tunnel forwards to (`-t <host>:<target>`).
    pub target_host: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            crypt: TunnelDefaults::CRYPT.to_string(),
            mtu: TunnelDefaults::MTU,
            mode: TunnelDefaults::MODE.to_string(),
            dscp: TunnelDefaults::DSCP,
            nocomp: false,
            key: None,
            listen_host: TunnelDefaults::LISTEN_HOST.to_string(),
            target_host: TunnelDefaults::TARGET_HOST.to_string(),
        }
    }
}

impl TransportOptions {
    /// Flags appended after the listen/target pair.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--crypt".to_string(),
            self.crypt.clone(),
            "--mtu".to_string(),
            self.mtu.to_string(),
        ];
        if self.nocomp {
            args.push("--nocomp".to_string());
        }
        args.extend([
            "--mode".to_string(),
            self.mode.clone(),
            "--dscp".to_string(),
            self.dscp.to_string(),
        ]);
        if let Some(ref key) = self.key {
            args.push("--key".to_string());
            args.push(key.clone());
        }
        args
    }

    fn validate(&self) -> Result<()> {
        if self.crypt.trim().is_empty() {
            return Err(BurrowError::Validation {
                field: "transport.crypt".into(),
                message: "must not be empty".into(),
            });
        }
        if self.mode.trim().is_empty() {
            return Err(BurrowError::Validation {
                field: "transport.mode".into(),
                message: "must not be empty".into(),
            });
        }
        if self.dscp > 63 {
            return Err(BurrowError::Validation {
                field: "transport.dscp".into(),
                message: format!("{} is outside 0..=63", self.dscp),
            });
        }
        Ok(())
    }
}

/// Runtime configuration for the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Directory scanned for the tunnel binary and used as its working directory.
    pub install_dir: PathBuf,
    /// Archive fetched into `install_dir` when no binary is present yet.
    pub download_url: Option<String>,
    /// Regex matched against file names in `install_dir`.
    pub binary_pattern: String,
    /// Seconds between reconciliation ticks.
    pub sync_interval_secs: u64,
    /// Grace period before a SIGTERM'd tunnel is force-killed.
    pub stop_grace_ms: u64,
    /// Per-tunnel output files go here; when unset, output is forwarded to the log.
    pub log_dir: Option<PathBuf>,
    pub transport: TransportOptions,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            download_url: None,
            binary_pattern: TunnelDefaults::BINARY_PATTERN.to_string(),
            sync_interval_secs: TunnelDefaults::SYNC_INTERVAL.as_secs(),
            stop_grace_ms: TunnelDefaults::STOP_GRACE_PERIOD.as_millis() as u64,
            log_dir: None,
            transport: TransportOptions::default(),
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| BurrowError::io_with_path(e, path))?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| BurrowError::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            return Err(BurrowError::Validation {
                field: "sync_interval_secs".into(),
                message: "must be greater than zero".into(),
            });
        }
        regex::Regex::new(&self.binary_pattern).map_err(|e| BurrowError::Validation {
            field: "binary_pattern".into(),
            message: e.to_string(),
        })?;
        self.transport.validate()
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// `$HOME/kcptun`, or `./kcptun` when the home directory is unknown.
pub fn default_install_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(TunnelDefaults::INSTALL_DIR_NAME)
}
