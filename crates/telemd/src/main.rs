//! telemd - telemetry aggregation daemon
//!
//! Pulls every catalog point from the search service once per interval,
//! keeps per-point history and streams new samples to live subscribers.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use telemd::config::Config;
use telemd::server::{self, AppState};
use telemd::{EngineSettings, FakeGateway, FetchGateway, HttpGateway, PointCatalog, TelemetryEngine};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "telemd", version, about = "Telemetry aggregation daemon")]
struct Args {
    /// Config file (defaults to /etc/telemd/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Point catalog, overrides daemon.catalog_path
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Serve the catalog's initial values instead of querying the store
    #[arg(long)]
    offline: bool,

    /// Do not start the HTTP server
    #[arg(long)]
    no_server: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let args = Args::parse();
    info!("telemd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };

    let catalog_path = args
        .catalog
        .clone()
        .unwrap_or_else(|| config.daemon.catalog_path.clone());
    let catalog = PointCatalog::load(&catalog_path)
        .with_context(|| format!("Failed to load catalog {}", catalog_path.display()))?;

    let gateway: Arc<dyn FetchGateway> = if args.offline {
        warn!("Offline mode: serving catalog initial values");
        let state = catalog.build_state().context("Invalid catalog")?;
        Arc::new(FakeGateway::from_state(&state))
    } else {
        info!("Reading {} from {}", config.gateway.index, config.gateway.url);
        Arc::new(HttpGateway::new(config.gateway.url.clone(), config.fetch_timeout())?)
    };

    let engine = Arc::new(
        TelemetryEngine::new(&catalog, gateway, EngineSettings::from_config(&config))
            .context("Failed to initialize telemetry engine")?,
    );
    let driver = Arc::clone(&engine).start();

    if config.server.enabled && !args.no_server {
        let bind = config.server.bind.clone();
        server::run(AppState::new(Arc::clone(&engine)), &bind, shutdown_signal()).await?;
    } else {
        shutdown_signal().await;
    }

    info!("Shutting down gracefully");
    driver.stop().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
