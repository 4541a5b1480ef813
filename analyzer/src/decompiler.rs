//! Client for the decompiler command runner.
//!
//! The decompiler toolchain lives in its own container behind a tiny
//! HTTP shim: `POST /run {cmd}` executes one shell command and returns
//! `{returncode, stdout, stderr}`. A non-zero exit is surfaced as
//! `AnalysisError::DecompilerFailed` with the stderr attached.

use crate::error::AnalysisError;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    cmd: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunOutput {
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct DecompilerClient {
    http: reqwest::Client,
    base_url: String,
}

impl DecompilerClient {
    /// `timeout` bounds each command execution; decompilation is slow,
    /// so callers configure a generous value.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Runs one shell command on the runner and returns its output.
    pub async fn run(&self, cmd: &str) -> Result<RunOutput, AnalysisError> {
        debug!(cmd, "running decompiler command");
        let response = self
            .http
            .post(format!("{}/run", self.base_url))
            .json(&RunRequest { cmd })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout
                } else {
                    AnalysisError::Transport(e.to_string())
                }
            })?;
        response
            .json::<RunOutput>()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))
    }

    /// Like [`run`](Self::run) but fails on a non-zero exit.
    pub async fn run_checked(&self, cmd: &str) -> Result<String, AnalysisError> {
        let output = self.run(cmd).await?;
        if output.returncode != 0 {
            return Err(AnalysisError::DecompilerFailed {
                exit: output.returncode,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }

    /// Full decompilation of one contract: write the bytecode to a hex
    /// file, run the toolchain, render the output, read back the TAC.
    pub async fn decompile(
        &self,
        address: Address,
        bytecode_hex: &str,
    ) -> Result<String, AnalysisError> {
        let [toolchain, render, read_back] = decompile_commands(address, bytecode_hex);
        self.run_checked(&toolchain).await?;
        self.run_checked(&render).await?;
        self.run_checked(&read_back).await
    }
}

/// The toolchain invocation sequence for one contract. Kept separate so
/// the command text is testable without a runner.
fn decompile_commands(address: Address, bytecode_hex: &str) -> [String; 3] {
    let tag = format!("{address:#x}");
    [
        format!(
            "cd /app && printf '%s' '{bytecode_hex}' > {tag}.hex && \
             /opt/gigahorse/gigahorse-toolchain/gigahorse.py {tag}.hex"
        ),
        format!(
            "cd /app/.temp/{tag}/out && \
             python3 /opt/gigahorse/gigahorse-toolchain/clients/visualizeout.py"
        ),
        format!("cat /app/.temp/{tag}/out/contract.tac"),
    ]
}

// ── Tests ────────────────────────────────────────────────────────
