/// Main entry point for webfiles terminals
mod api;
mod app_state;
mod config;
mod handlers;
mod protocol;
mod pty;
mod registry;
mod server;
mod service;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use app_state::AppState;
use config::{ConfigLoader, ENV_PREFIX, ServerConfig, init_logging};
use pty::{PortablePtyFactory, ProcessHost, SessionBackend, TmuxBackend};
use registry::SessionRegistry;
use server::{build_router, run_server_with_graceful_shutdown};
use service::{TerminalManager, WorkdirPolicy};

/// Shared, reconnectable web terminals
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (default: ./config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Permitted root for terminal working directories
    #[arg(long)]
    home: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // .env only fills variables that are not already set
    let _ = dotenvy::dotenv();

    let config = load_config(&cli)?;
    if cli.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let _log_guard = init_logging(&config.log)?;
    info!(
        "Starting webfiles terminals v{} (env prefix {}_)",
        env!("CARGO_PKG_VERSION"),
        ENV_PREFIX
    );

    let manager = Arc::new(build_manager(&config));
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;

    let app = build_router(AppState::new(manager.clone(), config));
    let served = run_server_with_graceful_shutdown(app, addr).await;

    manager.shutdown().await;
    served.with_context(|| format!("server on {} failed", addr))
}

fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(port) = cli.port {
        loader = loader.with_override("port", port.to_string());
    }
    if let Some(home) = &cli.home {
        loader = loader.with_override("home", home.to_string_lossy());
    }
    loader
        .load_config(cli.config.as_deref())
        .context("failed to load configuration")
}

fn build_manager(config: &ServerConfig) -> TerminalManager {
    let registry_path = if config.registry_file.is_absolute() {
        config.registry_file.clone()
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(&config.registry_file))
            .unwrap_or_else(|_| config.registry_file.clone())
    };
    let registry = SessionRegistry::open(&registry_path).unwrap_or_else(|e| {
        warn!("{}; starting with an empty terminal registry", e);
        SessionRegistry::empty(&registry_path)
    });
    info!("Terminal registry at {:?}", registry.path());

    let backend: Option<Arc<dyn SessionBackend>> = if config.backend.enabled {
        Some(Arc::new(TmuxBackend::new(&config.backend)))
    } else {
        info!("Persistent sessions disabled by configuration");
        None
    };
    let host = ProcessHost::new(
        Arc::new(PortablePtyFactory),
        backend,
        &config.backend,
        config.shell.clone(),
    );

    TerminalManager::new(
        registry,
        host,
        WorkdirPolicy::new(&config.home),
        config.transport.outbound_queue,
    )
}
