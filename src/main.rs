//! Bridge Relayer - relays bridge deposits between EVM chains
//!
//! The relayer polls every configured chain's bridge for deposits and votes on
//! the matching proposal on the destination chain.

use anyhow::{Context, Result};
use ethers::signers::LocalWallet;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod chain;
mod config;
mod coordination;
mod error;
mod events;
mod executor;
mod metrics;
mod state;
mod tx;

use chain::EvmChain;
use config::Settings;
use coordination::RelayEngine;
use metrics::MetricsServer;
use state::{BlockStore, PgBlockStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Bridge Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let wallet = load_wallet(&settings.wallet.private_key_env)?;

    // Initialize database connection
    let block_store = Arc::new(PgBlockStore::new(&settings.database).await?);
    block_store.run_migrations().await?;
    info!("Database connection established");

    // Initialize chains
    let engine = Arc::new(RelayEngine::new(&settings.relayer));
    let mut chains = Vec::new();
    for (name, chain_config) in settings.enabled_chains() {
        let chain = EvmChain::connect(
            chain_config,
            wallet.clone(),
            block_store.clone() as Arc<dyn BlockStore>,
        )
        .await
        .with_context(|| format!("Failed to initialize chain {}", name))?;
        let chain = Arc::new(chain);
        engine.add_chain(chain.clone())?;
        chains.push(chain);
    }
    info!("Chain connections initialized");

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let chains = chains.clone();
        let block_store = block_store.clone();
        let interval = settings.relayer.health_check_interval_secs.max(1);
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let mut healthy = true;
                for chain in &chains {
                    if !chain.health_check().await {
                        warn!("Chain {} health check failed", chain.name());
                        healthy = false;
                    }
                }

                if let Err(e) = block_store.health_check().await {
                    warn!("Database health check failed: {}", e);
                    healthy = false;
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping...");
            token.cancel();
        }
    });

    info!("Bridge Relayer is running");
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    let result = engine.run(token).await;

    // Abort background tasks
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    result?;
    info!("Bridge Relayer stopped");
    Ok(())
}

fn load_wallet(env_var: &str) -> Result<LocalWallet> {
    let key = std::env::var(env_var)
        .with_context(|| format!("Private key environment variable {} is not set", env_var))?;
    let wallet = key
        .trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .with_context(|| format!("Invalid private key in {}", env_var))?;
    Ok(wallet)
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,bridge_relayer=debug,sqlx=warn,hyper=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);

    // RELAYER_LOG_FORMAT=json for log shippers
    if std::env::var("RELAYER_LOG_FORMAT").is_ok_and(|f| f == "json") {
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
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
