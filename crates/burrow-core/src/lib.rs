//! Burrow Core - supervisor for UDP tunnel server processes.
//!
//! Keeps one tunnel process running per enabled mapping in the store,
//! repairs tunnels that die, and stops tunnels nobody asks for. The library
//! has no HTTP layer; `burrow-rpc` wraps it in a daemon.
//!
//! # Example
//!
//! ```rust,ignore
//! use burrow_core::{
//!     ReconciliationScheduler, SqliteMappingStore, Supervisor, SupervisorConfig, SystemSurface,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> burrow_core::Result<()> {
//!     let config = SupervisorConfig::default();
//!     let store = Arc::new(SqliteMappingStore::open_at("burrow.db".as_ref())?);
//!     let os = Arc::new(SystemSurface::new(config.stop_grace()));
//!
//!     let supervisor = Arc::new(Supervisor::new(store, os, config));
//!     supervisor.init();
//!
//!     let period = supervisor.config().sync_interval();
//!     let scheduler = ReconciliationScheduler::start(Arc::clone(&supervisor), period);
//!     tokio::signal::ctrl_c().await?;
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod cancel;
pub mod config;
pub mod error;
pub mod models;
pub mod platform;
pub mod process;
pub mod scheduler;
pub mod store;
pub mod supervisor;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::{SupervisorConfig, TransportOptions};
pub use error::{BurrowError, Result};
pub use models::{
    RemoveOutcome, SetOutcome, StartOutcome, SupervisorStatus, SyncReport, TunnelBinary, TunnelListing,
    TunnelMapping, TunnelOverview,
};
pub use platform::{OsSurface, ProcessEntry, SpawnRequest, SystemSurface};
pub use process::{ProcessDiscovery, TunnelProcessController};
pub use scheduler::{on_interval, ReconciliationScheduler};
pub use store::{MappingStore, SqliteMappingStore};
pub use supervisor::{InitStatus, Supervisor};
