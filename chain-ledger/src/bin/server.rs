//! Ledger server binary

use anyhow::Context;
use chain_ledger::{Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting chain ledger server");

    // Load configuration
    let config = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        Err(_) => Config::from_env().context("invalid environment configuration")?,
    };

    // Open ledger (verifies the whole chain)
    let ledger = Ledger::open(config).await.context("failed to open ledger")?;

    if let Some(tip) = ledger.latest_block()? {
        let stats = ledger.stats()?;
        tracing::info!(
            height = tip.height,
            block_hash = %tip.block_hash,
            transactions = stats.total_transactions,
            pending = stats.pending_transactions,
            users = stats.total_users,
            supply = %ledger.total_supply()?,
            "Chain tip"
        );
    }

    for (rank, (username, balance)) in ledger.balances().iter().take(10).enumerate() {
        tracing::info!(rank = rank + 1, username = %username, balance = %balance, "Leaderboard");
    }

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ledger server");
    ledger.shutdown().await?;
    Ok(())
}
