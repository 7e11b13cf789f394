//! Swap WatchTower - multi-chain atomic swap resolution
//!
//! Watches Bitcoin-family, EVM and Tezos chains for HTLC lock, redeem and
//! refund evidence and drives every swap to its terminal party statuses.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod currency;
mod error;
mod metrics;
mod repository;
mod scheduler;
mod searcher;
mod swap;
mod tasks;
mod tracker;
mod wallet;

use chain::BlockchainService;
use config::{DatabaseBackend, Settings, TrackerMode};
use currency::{Currencies, Currency};
use metrics::MetricsServer;
use repository::{MemoryRepository, PostgresRepository, SharedRepository};
use searcher::TransactionSearcher;
use tasks::{SwapTaskContext, SwapTaskFactory};
use tracker::{Dispatcher, Guard, Tracker, UpstreamSource};
use wallet::{LoggingSettlement, SharedSettlement};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(settings.logging.json);

    info!("Starting Swap WatchTower v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Instance {} in {} mode, {} currencies configured",
        settings.tracker.instance_id,
        settings.tracker.mode.as_str(),
        settings.currencies.len()
    );

    // Initialize storage
    let repository: SharedRepository = match settings.database.backend {
        DatabaseBackend::Postgres => {
            let postgres = PostgresRepository::new(&settings.database)
                .await
                .context("Failed to connect to database")?;
            info!("Database connection established");

            postgres.run_migrations().await.context("Failed to run migrations")?;
            info!("Database migrations complete");
            Arc::new(postgres)
        }
        DatabaseBackend::Memory => {
            warn!("Using in-memory storage, swap state is lost on restart");
            Arc::new(MemoryRepository::new())
        }
    };

    // Currencies and watchers
    let currencies = Arc::new(Currencies::new(
        settings
            .currencies
            .iter()
            .map(|(name, config)| Currency::from_config(name, config)),
    ));
    let service = Arc::new(
        BlockchainService::from_settings(&settings, &currencies).context("Failed to build watchers")?,
    );
    info!("Watchers registered for {}", service.currencies().join(", "));

    let upstream = if settings.upstream.enabled {
        Some(UpstreamSource::from_config(&settings.upstream)?)
    } else {
        None
    };

    let dispatcher = match settings.tracker.mode {
        TrackerMode::Tracker => {
            let searcher = TransactionSearcher::new(repository.clone(), service.clone(), currencies.clone());
            Dispatcher::Tracker(Arc::new(Tracker::new(
                repository.clone(),
                searcher,
                upstream,
                settings.tracker.clone(),
            )))
        }
        TrackerMode::Guard => {
            let wallet: Option<SharedSettlement> = if settings.wallet.enabled {
                Some(Arc::new(LoggingSettlement))
            } else {
                None
            };
            let factory = SwapTaskFactory::new(SwapTaskContext {
                repository: repository.clone(),
                service: service.clone(),
                currencies: currencies.clone(),
                wallet,
            });
            Dispatcher::Guard(Arc::new(Guard::new(
                repository.clone(),
                factory,
                upstream,
                settings.tracker.clone(),
            )))
        }
    };

    let cancel = CancellationToken::new();

    // Start API server
    let api_handle = tokio::spawn({
        let state = api::AppState {
            repository: repository.clone(),
            dispatcher: dispatcher.clone(),
            instance_id: settings.tracker.instance_id.clone(),
            currencies: service.currencies(),
            started_at: Arc::new(Instant::now()),
        };
        let config = settings.api.clone();
        let cancel = cancel.clone();
        async move {
            if let Err(e) = api::run_server(config, state, cancel).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(cancel).await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start dispatcher
    let dispatcher_handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        async move {
            if let Err(e) = dispatcher.run(cancel).await {
                error!("Dispatcher error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let repository = repository.clone();
        let dispatcher = dispatcher.clone();
        let interval = Duration::from_secs(settings.tracker.health_check_interval_secs);
        let cancel = cancel.clone();
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match repository.health_check().await {
                    Ok(()) => metrics::record_health_check(),
                    Err(e) => {
                        warn!("Database health check failed: {}", e);
                        metrics::record_health_check_failure();
                    }
                }

                let depths = dispatcher.depths();
                info!(
                    "Queues: {} active, {} waiting, {} failed",
                    depths.active, depths.waiting, depths.failed
                );
            }
        }
    });

    info!("Swap WatchTower is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");
    cancel.cancel();

    // Graceful shutdown
    for (name, handle) in [
        ("dispatcher", dispatcher_handle),
        ("api", api_handle),
        ("health", health_handle),
    ] {
        if let Err(e) = handle.await {
            warn!("{} task ended abnormally: {}", name, e);
        }
    }
    if let Some(handle) = metrics_handle {
        if let Err(e) = handle.await {
            warn!("metrics task ended abnormally: {}", e);
        }
    }

    info!("Swap WatchTower stopped");
    Ok(())
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,swap_watchtower=debug,sqlx=warn,hyper=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
