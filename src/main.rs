use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use portfolio_history::api::{self, AppState};
use portfolio_history::cache::{KvStore, MemoryStore};
use portfolio_history::config::Config;
use portfolio_history::db::repository::PgStore;
use portfolio_history::history::build_service;
use portfolio_history::timeframe::system_clock;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // RUST_LOG filters, LOG_FORMAT=json switches to one JSON object per line.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }

    tracing::info!("Portfolio history service starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(
        chains = config.chains.len(),
        "Configuration loaded from {}",
        config_path
    );

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    let store: Arc<dyn KvStore> = match &config.database {
        Some(database) => {
            let pool = PgPoolOptions::new()
                .max_connections(database.max_connections)
                .connect(&database.url)
                .await
                .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

            tracing::info!("Connected to PostgreSQL");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

            tracing::info!("Database migrations complete");

            let store = PgStore::new(pool);
            handles.push(tokio::spawn(run_pruner(
                store.clone(),
                Duration::from_secs(config.cache.prune_interval_secs),
                shutdown.clone(),
            )));
            Arc::new(store)
        }
        None => {
            tracing::info!(max_entries = config.cache.max_entries, "Using in-memory cache");
            Arc::new(MemoryStore::new(config.cache.max_entries))
        }
    };

    let service = build_service(&config, store, system_clock(), shutdown.clone())?;

    if config.api.enabled {
        let state = AppState {
            service,
            chains: config.chains.iter().map(|c| c.name.clone()).collect(),
            default_chains: config.history.default_chains.clone(),
        };
        let host = config.api.host.clone();
        let port = config.api.port;
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = api::serve(state, &host, port, shutdown).await {
                tracing::error!(error = %e, "API server failed");
            }
        }));
    } else {
        tracing::warn!("API disabled, nothing to serve");
    }

    tracing::info!("Service started. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping...");
    shutdown.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("Portfolio history service stopped gracefully");
    Ok(())
}

/// Periodically delete expired cache rows until shutdown.
async fn run_pruner(store: PgStore, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.prune().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Pruned expired cache entries"),
                    Err(e) => tracing::warn!(error = %e, "Cache pruning failed"),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
