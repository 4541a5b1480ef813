//! Configuration for the Warden firewall.
//!
//! Built once at process start from the environment and passed down
//! explicitly; no component reinitializes clients behind the scenes.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Real execution node (Alchemy, Infura, a local geth, ...). The
    /// passthrough target, the fork source, and the relay target for
    /// confirmed transactions.
    pub upstream_rpc_url: String,

    /// Forking sandbox node (hardhat-compatible). All simulations run
    /// here; nothing sent to it ever reaches the real network.
    pub sandbox_rpc_url: String,

    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// How many blocks behind the real head to fork, so the fork never
    /// lands on a block that might still reorg.
    pub safety_margin: u64,

    /// Upper bound on waiting for a simulated transaction's receipt.
    pub receipt_timeout_secs: u64,

    /// Transport timeout for sandbox and upstream JSON-RPC calls.
    pub rpc_timeout_secs: u64,

    /// Notification gateway base URL (the chat bot's HTTP side).
    pub notifier_url: String,

    /// Decompiler command-runner base URL.
    pub decompiler_url: String,

    /// Decompilation is slow; this bounds each runner command.
    pub decompiler_timeout_secs: u64,

    /// OpenAI-compatible text-generation API base URL.
    pub textgen_url: String,

    /// API key for the text-generation API.
    pub textgen_api_key: String,

    /// Model id used for all narrative steps.
    pub textgen_model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            upstream_rpc_url: std::env::var("WARDEN_UPSTREAM_RPC")
                .unwrap_or_else(|_| "http://localhost:8546".into()),
            sandbox_rpc_url: std::env::var("WARDEN_SANDBOX_RPC")
                .unwrap_or_else(|_| "http://hardhat-network:8545".into()),
            host: std::env::var("WARDEN_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("WARDEN_PORT")
                .unwrap_or_else(|_| "8545".into())
                .parse()
                .context("Invalid WARDEN_PORT")?,
            safety_margin: std::env::var("WARDEN_SAFETY_MARGIN")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .context("Invalid WARDEN_SAFETY_MARGIN")?,
            receipt_timeout_secs: std::env::var("WARDEN_RECEIPT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".into())
                .parse()
                .context("Invalid WARDEN_RECEIPT_TIMEOUT_SECS")?,
            rpc_timeout_secs: std::env::var("WARDEN_RPC_TIMEOUT_SECS")
                .unwrap_or_else(|_| "100".into())
                .parse()
                .context("Invalid WARDEN_RPC_TIMEOUT_SECS")?,
            notifier_url: std::env::var("WARDEN_NOTIFIER_URL")
                .unwrap_or_else(|_| "http://telegram-bot:8000".into()),
            decompiler_url: std::env::var("WARDEN_DECOMPILER_URL")
                .unwrap_or_else(|_| "http://gigahorse:8000".into()),
            decompiler_timeout_secs: std::env::var("WARDEN_DECOMPILER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "3000".into())
                .parse()
                .context("Invalid WARDEN_DECOMPILER_TIMEOUT_SECS")?,
            textgen_url: std::env::var("WARDEN_TEXTGEN_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            textgen_api_key: std::env::var("WARDEN_TEXTGEN_API_KEY").unwrap_or_default(),
            textgen_model: std::env::var("WARDEN_TEXTGEN_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".into()),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
