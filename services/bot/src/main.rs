//! Phototag Bot service
//!
//! Long-polls the Telegram Bot API, dispatches each update through the rate
//! limiter into the upload and search flows, and serves an admin API.
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/bot.toml, /etc/phototag/bot.toml)
//! 2. Environment variables (prefixed with BOT__, e.g. BOT__TELEGRAM__TOKEN)
//!
//! See `config.rs` for detailed configuration options.

use anyhow::{Context, Result};
use phototag_bot::api::start_api_server;
use phototag_bot::config::{Config, ServiceConfig, StorageBackend};
use phototag_bot::storage::{MemoryStorage, PgStorage, Storage};
use phototag_bot::transport::{TelegramClient, UpdatePoller};
use phototag_bot::App;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        storage = ?config.storage.backend,
        "Starting Phototag bot"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize storage
    let (storage, pg): (Arc<dyn Storage>, Option<Arc<PgStorage>>) = match config.storage.backend {
        StorageBackend::Postgres => {
            let pg = Arc::new(
                PgStorage::new(&config.storage)
                    .await
                    .context("Failed to initialize Postgres storage")?,
            );
            if config.storage.run_migrations {
                pg.run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }
            (pg.clone() as Arc<dyn Storage>, Some(pg))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage, data is lost on restart");
            (Arc::new(MemoryStorage::new()) as Arc<dyn Storage>, None)
        }
    };

    let telegram = Arc::new(
        TelegramClient::new(&config.telegram).context("Failed to initialize Telegram client")?,
    );

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let poller = UpdatePoller::new(telegram.clone(), config.telegram.poll_timeout_secs);
    let api_config = config.api.clone();
    let app = Arc::new(App::new(config, storage, telegram));

    // Spawn update poller task
    let poller_shutdown = shutdown.clone();
    let poller_handle = tokio::spawn(async move {
        poller.run(events_tx, poller_shutdown).await;
    });

    // Spawn API server task
    let api_handle = if api_config.enabled {
        let api_app = app.clone();
        let api_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_api_server(api_app, &api_config, api_shutdown).await {
                error!(error = %e, "API server error");
            }
        }))
    } else {
        None
    };

    // Cancel everything on the first signal
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.cancel();
    });

    info!("Phototag bot started successfully");

    app.run(events_rx, shutdown.clone()).await;

    info!("Shutting down Phototag bot");
    shutdown.cancel();

    if !app.shutdown().await {
        warn!("Some event handlers did not finish before the shutdown timeout");
    }

    if let Err(e) = poller_handle.await {
        error!(error = %e, "Update poller task failed");
    }
    if let Some(handle) = api_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "API server task failed");
        }
    }

    if let Some(pg) = pg {
        pg.close().await;
    }

    info!("Phototag bot stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(config: &ServiceConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.log_format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
