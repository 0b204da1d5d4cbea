//! Burrow RPC Server - tunnel supervisor daemon with a JSON-RPC admin surface.
//!
//! Starts stored tunnels, reconciles them on a fixed interval, and serves
//! JSON-RPC 2.0 for administrative changes.

mod handlers;
mod server;

use anyhow::Result;
use burrow_core::config::StoreConfig;
use burrow_core::{
    bootstrap, InitStatus, ReconciliationScheduler, SqliteMappingStore, Supervisor,
    SupervisorConfig, SystemSurface,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "burrow-rpc")]
#[command(about = "Tunnel supervisor with a JSON-RPC admin server")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mapping database (defaults to burrow.db inside the install directory)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Directory holding the tunnel binary (overrides the config file)
    #[arg(long)]
    install_dir: Option<PathBuf>,

    /// Archive to fetch when no tunnel binary is installed (overrides the config file)
    #[arg(long)]
    download_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG takes precedence over --debug
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Burrow RPC Server");

    let mut config = match args.config {
        Some(ref path) => SupervisorConfig::load(path)?,
        None => SupervisorConfig::default(),
    };
    if let Some(dir) = args.install_dir {
        config.install_dir = dir;
    }
    if let Some(url) = args.download_url {
        config.download_url = Some(url);
    }
    config.validate()?;

    info!("Install directory: {}", config.install_dir.display());

    let db_path = args
        .database
        .unwrap_or_else(|| config.install_dir.join(StoreConfig::DEFAULT_DB_FILENAME));
    let store = SqliteMappingStore::open_at(&db_path)?;
    info!("Mapping database: {}", db_path.display());

    // A failed download leaves tunnels disabled; the admin server still runs
    if let Err(e) = bootstrap::ensure_installed(&config).await {
        error!("Tunnel bootstrap failed: {}", e);
    }

    let os = Arc::new(SystemSurface::new(config.stop_grace()));
    let supervisor = Arc::new(Supervisor::new(
        Arc::new(store.clone()),
        os,
        config.clone(),
    ));

    match supervisor.init() {
        InitStatus::Started(handle) => {
            tokio::spawn(async move {
                match handle.await {
                    Ok(report) => info!(
                        "Startup batch finished: {} started, {} already bound, {} failed",
                        report.started.len(),
                        report.already_bound.len(),
                        report.failed.len()
                    ),
                    Err(e) => error!("Startup batch task failed: {}", e),
                }
            });
        }
        InitStatus::Disabled => warn!("Tunnels are disabled for this run"),
        InitStatus::AlreadyInitialized => {}
    }

    let scheduler =
        ReconciliationScheduler::start(Arc::clone(&supervisor), config.sync_interval());

    let state = server::AppState { supervisor, store };
    let addr = server::start_server(state, &args.host, args.port).await?;

    // Machine-readable port line for wrappers that start us with --port 0
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping reconciliation");
    scheduler.shutdown().await;

    Ok(())
}
