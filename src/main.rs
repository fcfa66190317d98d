//! Swapgate - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use swapgate::{
    BackendFactory, LifecycleManager, ModelRegistry, api, config::GatewayConfig, metrics,
};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "swapgate")]
#[command(about = "Single-resident-model inference gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override API port
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting swapgate");

    // Load configuration
    let mut config = GatewayConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.api_port = port;
    }

    config.validate()?;

    tracing::info!(
        api_port = config.api_port,
        models = config.models.len(),
        keep_model_loaded = config.keep_model_loaded,
        model_unload_delay_secs = config.model_unload_delay_secs,
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    let registry = Arc::new(ModelRegistry::from_config(&config)?);

    let manager = LifecycleManager::new(
        registry.clone(),
        Arc::new(BackendFactory::new()),
        config.lifecycle_mode(),
        config.swap_settle(),
    );

    // A failed preload leaves the gateway up with no resident model
    if config.preload_default_model
        && let Some(default) = registry.default_model()
    {
        match manager.activate(default).await {
            Ok(resident) => {
                tracing::info!(model = %resident.id(), "Default model preloaded");
                manager.mark_use_completed().await;
            }
            Err(e) => {
                tracing::error!(model = %default, error = %e, "Failed to preload default model");
            }
        }
    }

    // Setup API
    let app_state = api::AppState {
        manager: manager.clone(),
        registry: registry.clone(),
        prometheus_handle,
    };

    let app = api::create_router(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("Shutting down...");

    if let Some(model) = manager.shutdown().await {
        tracing::info!(model = %model, "Released resident model");
    }

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
