//! Strata daemon - runs the storage engine and its background tasks

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use strata::config::Config;
use strata::embedding::{Embedder, LocalEmbedder};
use strata::error::{Result, StrataError};
use strata::StorageContext;

/// Strata - multi-tier cache and memory engine
#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Multi-tier cache and memory engine with semantic lookup")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the engine until interrupted (default command)
    #[command(name = "serve")]
    Serve {
        /// Skip loading the local embedding model
        #[arg(long)]
        no_embeddings: bool,
    },
    /// Connect to every tier, print its health and exit
    #[command(name = "check")]
    Check,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!("Config loaded: {:?}", config);

    match cli.command {
        None => serve(config, false).await,
        Some(Command::Serve { no_embeddings }) => serve(config, no_embeddings).await,
        Some(Command::Check) => check(config).await,
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,strata=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn load_embedder(skip: bool) -> Option<Arc<dyn Embedder>> {
    if skip {
        return None;
    }
    tracing::info!("Initializing embedding model (this may take a moment on first run)...");
    match LocalEmbedder::load().await {
        Ok(embedder) => Some(Arc::new(embedder)),
        Err(e) => {
            tracing::warn!("Embedding model unavailable, continuing without it: {}", e);
            None
        }
    }
}

async fn serve(config: Config, no_embeddings: bool) -> Result<()> {
    tracing::info!("Starting Strata daemon");

    let embedder = load_embedder(no_embeddings).await;
    let context = StorageContext::build(config, embedder)?;
    if let Err(e) = context.initialize().await {
        tracing::warn!("Running degraded: {}", e);
    }
    context.start_background();

    shutdown_signal().await;

    context.shutdown().await;
    tracing::info!("Strata daemon stopped");
    Ok(())
}

async fn check(config: Config) -> Result<()> {
    let context = StorageContext::build(config, None)?;
    let init = context.initialize().await;

    let mut healthy = true;
    for (tier, report) in context.tiers().health_all().await {
        healthy &= report.healthy;
        println!(
            "{:<5} {:<16} {:>8.2?}  {}",
            tier.as_str(),
            report.status.as_str(),
            report.latency,
            report.message.as_deref().unwrap_or("ok")
        );
    }
    for (endpoint, metrics) in context.registry().metrics() {
        println!(
            "pool  {:<16} opened={} acquired={} timeouts={}",
            endpoint, metrics.connections_opened, metrics.acquired, metrics.acquire_timeouts
        );
    }

    context.shutdown().await;
    init?;
    if healthy {
        Ok(())
    } else {
        Err(StrataError::ConnectionFailure(
            "one or more tiers are unhealthy".to_string(),
        ))
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
