//! Fraud scoring node binary
//!
//! Usage: `fraud-node [config.toml]`. Without a path the configuration comes
//! from defaults and `FRAUD_*` / `LEDGER_*` environment variables.

use anyhow::Context;
use fraud_engine::LogisticRiskModel;
use ledger_core::Ledger;
use offline_sync::{EngineBuilder, NodeConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let mut config = NodeConfig::from_file(&path)
                .with_context(|| format!("loading config from {}", path))?;
            config.apply_env().context("applying environment overrides")?;
            config
        }
        None => NodeConfig::from_env().context("loading config from environment")?,
    };

    init_tracing(config.log_json);

    tracing::info!(
        ledger_dir = ?config.ledger.data_dir,
        queue_dir = ?config.queue.data_dir,
        known_users = config.known_users.len(),
        "Starting fraud node"
    );

    let ledger = Arc::new(Ledger::open(config.ledger.clone()).await?);
    tracing::info!("Ledger opened successfully");

    let engine = EngineBuilder::from_config(&config)
        .with_model(Arc::new(LogisticRiskModel::default()))
        .build(ledger.clone())
        .await?;

    let stats = engine.statistics()?;
    tracing::info!(
        pending = stats.queue.pending,
        validated = stats.queue.validated,
        failed = stats.queue.failed,
        "Offline queue loaded"
    );

    let sync = engine.spawn_sync_service();

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down fraud node");
    sync.shutdown().await;
    ledger.shutdown().await?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
