//! warden-rpc — a human-in-the-loop firewall in front of an Ethereum
//! JSON-RPC endpoint.
//!
//! Wallets point at this process instead of the real node. Reads pass
//! through; transaction submissions are simulated in a forked sandbox,
//! held pending, and only reach the real network after the watching
//! user confirms them through the admin API.

mod admin;
mod config;
mod error;
mod ledger;
mod notify;
mod rpc;
mod sandbox;
mod simulator;
mod types;

use anyhow::{Context, Result};
use config::Config;
use rpc::AppState;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let bind = format!("{}:{}", config.host, config.port);
    info!(
        upstream = %config.upstream_rpc_url,
        sandbox = %config.sandbox_rpc_url,
        %bind,
        "starting warden-rpc"
    );

    let state = Arc::new(AppState::new(config));
    let router = admin::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    axum::serve(listener, router)
        .await
        .context("server terminated")?;
    Ok(())
}
