//! Error types for Burrow.
//!
//! Batch operations (`init`, `sync_status`) contain these per mapping and log
//! them; direct administrative calls (`set`) hand them back to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Burrow supervisor.
#[derive(Debug, Error)]
pub enum BurrowError {
    // Bootstrap errors
    #[error("Tunnel bootstrap failed: {message}")]
    Bootstrap { message: String },

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    // OS introspection and process errors
    #[error("Process discovery failed: {message}")]
    Discovery { message: String },

    #[error("Failed to spawn tunnel on port {tunnel_port}: {message}")]
    Spawn { tunnel_port: u16, message: String },

    #[error("Failed to terminate process {pid}: {message}")]
    Terminate { pid: u32, message: String },

    // Desired-state errors
    #[error("No tunnel mapping for target port {target_port}")]
    MappingNotFound { target_port: u16 },

    #[error("Tunnel port {tunnel_port} is already assigned to another target")]
    TunnelPortConflict { tunnel_port: u16 },

    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Tunnel supervisor is not ready")]
    NotReady,

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Burrow operations.
pub type Result<T> = std::result::Result<T, BurrowError>;

impl From<std::io::Error> for BurrowError {
    fn from(err: std::io::Error) -> Self {
        BurrowError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BurrowError {
    fn from(err: serde_json::Error) -> Self {
        BurrowError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for BurrowError {
    fn from(err: rusqlite::Error) -> Self {
        BurrowError::Store {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for BurrowError {
    fn from(err: reqwest::Error) -> Self {
        BurrowError::Network {
            message: err.to_string(),
            cause: err.url().map(|u| u.to_string()),
        }
    }
}

impl BurrowError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BurrowError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a discovery error from anything displayable.
    pub fn discovery(message: impl std::fmt::Display) -> Self {
        BurrowError::Discovery {
            message: message.to_string(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: OS/process failure (discovery, spawn, terminate)
    /// - -32001: Mapping not found
    /// - -32002: Supervisor not ready (tunnels disabled or init pending)
    /// - -32003: Bootstrap/network failure
    /// - -32005: Validation error or tunnel port conflict
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            BurrowError::Discovery { .. }
            | BurrowError::Spawn { .. }
            | BurrowError::Terminate { .. } => -32000,

            BurrowError::MappingNotFound { .. } => -32001,

            BurrowError::NotReady => -32002,

            BurrowError::Bootstrap { .. }
            | BurrowError::DownloadFailed { .. }
            | BurrowError::Network { .. } => -32003,

            BurrowError::Validation { .. } | BurrowError::TunnelPortConflict { .. } => -32005,

            _ => -32603,
        }
    }

    /// Whether the next reconciliation tick is expected to repair this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BurrowError::Discovery { .. }
                | BurrowError::Spawn { .. }
                | BurrowError::Terminate { .. }
                | BurrowError::Store { .. }
        )
    }
}
