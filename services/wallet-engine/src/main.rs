//! Wallet engine service binary

use anyhow::Context;
use dotenv::dotenv;
use prometheus::Registry;
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;
use wallet_engine::metrics::{register_metrics, render};
use wallet_engine::{Config, WalletEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_target(false)
        .init();

    info!("Starting wallet engine");

    let config = Config::from_env().context("failed to load configuration")?;
    config.validate().map_err(anyhow::Error::msg)?;

    let registry = Registry::new();
    register_metrics(&registry)?;

    let engine = WalletEngine::open(&config).await?;

    let tokens = engine.tokens().clone();
    let sweep_every = Duration::from_secs(config.payment.sweep_interval_secs);
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            match tokens.sweep_expired().await {
                Ok(0) => {}
                Ok(swept) => info!("Expired {} overdue payment tokens", swept),
                Err(e) => error!("Payment token sweep failed: {}", e),
            }
        }
    });

    info!(
        "Wallet engine running, sweeping payment tokens every {}s",
        config.payment.sweep_interval_secs
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down wallet engine");

    sweeper.abort();
    let _ = sweeper.await;
    engine.shutdown().await;

    match render(&registry) {
        Ok(snapshot) => debug!("Final metrics:\n{}", snapshot),
        Err(e) => warn!("Could not render metrics: {}", e),
    }

    Ok(())
}
