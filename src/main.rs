//! Rebalancer - quote and settlement engine for bonded cross-chain transfers
//!
//! Quotes the fee and output amount for a requested transfer, then builds,
//! signs, and submits the on-chain transaction that fulfills it.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod error;
mod metrics;
mod price;
mod quote;
mod store;
mod tx;

use chain::ChainRpcPool;
use config::Settings;
use metrics::MetricsServer;
use price::CoinGecko;
use quote::QuoteEngine;
use store::{QuoteStore, RedisStore};
use tx::{FeeModelResolver, SettlementSubmitter, TransactionBuilder};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Rebalancer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!("Loaded configuration for {} chains", settings.chains.len());

    // Signing key must be present before any request is accepted
    let wallet = SettlementSubmitter::load_wallet(&settings)?;

    // Connect the quote store
    let redis_store = RedisStore::connect(&settings.store).await?;
    let redis_store = Arc::new(redis_store);
    info!("Quote store connection established");

    // Initialize chain RPC pools
    let pool = Arc::new(ChainRpcPool::new(&settings)?);
    info!("Chain RPC pools initialized");

    let builder = Arc::new(TransactionBuilder::new(&settings)?);
    let oracle = Arc::new(CoinGecko::new(&settings.pricing));

    let submitter = Arc::new(SettlementSubmitter::new(
        pool.clone(),
        builder.clone(),
        FeeModelResolver::new(&settings),
        wallet,
    ));

    // Quotes estimate gas as the same account that will settle
    let engine = Arc::new(QuoteEngine::new(
        oracle,
        pool.clone(),
        builder,
        submitter.signer_address(),
        &settings,
    ));

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let store: Arc<dyn QuoteStore> = redis_store.clone();
        let state = api::AppState {
            engine,
            submitter,
            store,
            pool: pool.clone(),
        };
        let api_config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(api_config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let pool = pool.clone();
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;

                for (chain_id, healthy) in pool.health_check().await {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }
            }
        }
    });

    info!("Rebalancer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    // Release the store connection last so in-flight handlers finish first
    match Arc::try_unwrap(redis_store) {
        Ok(store) => store.close().await,
        Err(_) => warn!("Quote store still referenced at shutdown"),
    }

    info!("Rebalancer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rebalancer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
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
