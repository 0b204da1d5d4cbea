//! Tunnel process management.
//!
//! Detection reads the process table on every call: a tunnel is any instance
//! of the resolved binary, and its ports come from its command line
//! (`-l <host>:<tunnel>`, `-t <host>:<target>`). Nothing is tracked by pid
//! between calls, so state survives supervisor restarts by construction.
//!
//! # Example
//!
//! ```rust,no_run
//! use burrow_core::platform::SystemSurface;
//! use burrow_core::process::ProcessDiscovery;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> burrow_core::Result<()> {
//!     let discovery = ProcessDiscovery::new(Arc::new(SystemSurface::default()), "server_linux_amd64");
//!
//!     for port in discovery.list_active_tunnel_ports().await? {
//!         println!("tunnel bound on {}", port);
//!     }
//!     Ok(())
//! }
//! ```

mod controller;
mod discovery;

pub use controller::{TunnelLaunchConfig, TunnelProcessController};
pub use discovery::{parse_listen_port, parse_target_port, ProcessDiscovery};
