//! icat-ingest - catalog attribute ingest service
//!
//! Fuses per-image vision extractions into one record per item and runs
//! resumable batch ingests over the catalog, controlled via HTTP REST + SSE.

use anyhow::{Context, Result};
use clap::Parser;
use icat_common::config::LoggingConfig;
use icat_common::events::EventBus;
use icat_ingest::config::ServiceConfig;
use icat_ingest::extraction::HttpExtractionAdapter;
use icat_ingest::fusion::FusionEngine;
use icat_ingest::orchestrator::Orchestrator;
use icat_ingest::persistence::SqliteGateway;
use icat_ingest::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for icat-ingest
#[derive(Parser, Debug)]
#[command(name = "icat-ingest")]
#[command(about = "Catalog attribute fusion and batch ingest service")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "ICAT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides `bind_addr`
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
        config.validate().context("Invalid --bind address")?;
    }

    init_tracing(&config.logging)?;

    info!("Starting icat-ingest");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let gateway = Arc::new(
        SqliteGateway::open(&db_path)
            .await
            .context("Failed to open database")?,
    );
    info!("Database connection established");

    let adapter = Arc::new(
        HttpExtractionAdapter::new(&config.extraction)
            .context("Failed to initialize extraction adapter")?,
    );
    info!(endpoint = adapter.endpoint(), "Extraction adapter initialized");

    let engine = FusionEngine::new(config.fusion.clone(), config.field_schema());
    info!(fields = engine.schema().len(), "Fusion engine initialized");

    let event_bus = EventBus::new(100);
    let orchestrator = Orchestrator::new(
        adapter,
        gateway.clone(),
        gateway.clone(),
        engine,
        config.orchestrator.clone(),
    )
    .with_event_bus(event_bus);

    let state = AppState::new(Arc::new(orchestrator));
    let app = icat_ingest::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);
    info!("Health check: http://{}/health", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    gateway.close().await;
    Ok(())
}

/// Initialize tracing. `RUST_LOG` overrides `[logging] level`.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log filter")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        None => builder.init(),
    }

    Ok(())
}
