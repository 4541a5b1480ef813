//! Client for the forking execution sandbox.
//!
//! The sandbox is a hardhat-compatible node holding exactly one fork of
//! real chain state at a time, with one outstanding snapshot per fork.
//! This module only exposes the raw operations; the serialization
//! discipline (one simulation at a time, unconditional revert) lives in
//! the simulator, which is the sole owner of fork and snapshot handles.

use crate::config::Config;
use crate::error::SimulationError;
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use warden_analyzer::error::AnalysisError;
use warden_analyzer::proxy::ChainReader;

/// Interval between receipt polls inside the fork.
const RECEIPT_POLL_MS: u64 = 200;

/// A transaction object as the sandbox reports it after broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxTransaction {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub gas: U256,
    #[serde(default)]
    pub gas_price: Option<U256>,
    #[serde(default)]
    pub max_fee_per_gas: Option<U256>,
    pub input: Bytes,
    pub nonce: U256,
    #[serde(default)]
    pub chain_id: Option<U256>,
    #[serde(rename = "type", default)]
    pub tx_type: Option<U256>,
}

impl SandboxTransaction {
    /// Effective gas price: legacy `gasPrice`, or the fee cap for
    /// EIP-1559 transactions.
    pub fn effective_gas_price(&self) -> Option<U256> {
        self.gas_price.or(self.max_fee_per_gas)
    }
}

/// A receipt log, raw. Decoding against known event shapes happens in
/// the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    #[serde(default)]
    pub log_index: Option<U256>,
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

/// Sandbox operations the simulator depends on. Implemented by
/// [`SandboxClient`] against a live node and by mocks in tests.
#[allow(async_fn_in_trait)]
pub trait Sandbox {
    /// Height of the real chain (not the fork).
    async fn latest_real_block(&self) -> Result<u64, SimulationError>;
    /// Drop the current fork and re-fork from the real chain at `block`.
    async fn reset_fork(&self, block: u64) -> Result<(), SimulationError>;
    async fn snapshot(&self) -> Result<String, SimulationError>;
    async fn revert(&self, handle: &str) -> Result<(), SimulationError>;
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, SimulationError>;
    async fn get_transaction(&self, hash: B256) -> Result<SandboxTransaction, SimulationError>;
    async fn wait_for_receipt(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<Receipt, SimulationError>;
    async fn get_trace(
        &self,
        hash: B256,
    ) -> Result<warden_analyzer::trace::InstructionTrace, SimulationError>;
}

#[derive(Debug, Clone)]
pub struct SandboxClient {
    http: reqwest::Client,
    sandbox_url: String,
    upstream_url: String,
}

impl SandboxClient {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            sandbox_url: config.sandbox_rpc_url.clone(),
            upstream_url: config.upstream_rpc_url.clone(),
        }
    }

    async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value, SimulationError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        debug!(method, url, "sandbox rpc call");
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SimulationError::Transport(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| SimulationError::Transport(e.to_string()))?;

        if let Some(error) = body.get("error") {
            return Err(SimulationError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-32603),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn sandbox_call(&self, method: &str, params: Value) -> Result<Value, SimulationError> {
        self.call(&self.sandbox_url, method, params).await
    }
}

impl Sandbox for SandboxClient {
    async fn latest_real_block(&self) -> Result<u64, SimulationError> {
        let result = self
            .call(&self.upstream_url, "eth_blockNumber", json!([]))
            .await?;
        hex_quantity(&result)
    }

    async fn reset_fork(&self, block: u64) -> Result<(), SimulationError> {
        let params = json!([{
            "forking": {
                "jsonRpcUrl": self.upstream_url,
                "blockNumber": block,
            }
        }]);
        self.sandbox_call("hardhat_reset", params).await?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<String, SimulationError> {
        let result = self.sandbox_call("evm_snapshot", json!([])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SimulationError::Transport("snapshot handle is not a string".into()))
    }

    async fn revert(&self, handle: &str) -> Result<(), SimulationError> {
        let result = self.sandbox_call("evm_revert", json!([handle])).await?;
        if result.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(SimulationError::Transport(format!(
                "snapshot handle {handle} no longer valid"
            )))
        }
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, SimulationError> {
        let hex_payload = format!("0x{}", hex::encode(raw));
        let result = self
            .sandbox_call("eth_sendRawTransaction", json!([hex_payload]))
            .await?;
        parse_b256(&result)
    }

    async fn get_transaction(&self, hash: B256) -> Result<SandboxTransaction, SimulationError> {
        let result = self
            .sandbox_call("eth_getTransactionByHash", json!([hash]))
            .await?;
        if result.is_null() {
            return Err(SimulationError::Transport(format!(
                "transaction {hash:#x} not found in fork"
            )));
        }
        serde_json::from_value(result).map_err(|e| SimulationError::Transport(e.to_string()))
    }

    async fn wait_for_receipt(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<Receipt, SimulationError> {
        let poll = async {
            loop {
                let result = self
                    .sandbox_call("eth_getTransactionReceipt", json!([hash]))
                    .await?;
                if !result.is_null() {
                    return serde_json::from_value::<Receipt>(result)
                        .map_err(|e| SimulationError::Transport(e.to_string()));
                }
                tokio::time::sleep(Duration::from_millis(RECEIPT_POLL_MS)).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| SimulationError::ReceiptTimeout(hash))?
    }

    async fn get_trace(
        &self,
        hash: B256,
    ) -> Result<warden_analyzer::trace::InstructionTrace, SimulationError> {
        let result = self
            .sandbox_call("debug_traceTransaction", json!([hash, {}]))
            .await?;
        serde_json::from_value(result).map_err(|e| SimulationError::Transport(e.to_string()))
    }
}

/// Chain reads for the static-analysis pipeline run against the same
/// sandbox node, outside any fork/snapshot sequence.
impl ChainReader for SandboxClient {
    async fn get_storage_at(&self, address: Address, slot: B256) -> Result<B256, AnalysisError> {
        let result = self
            .sandbox_call("eth_getStorageAt", json!([address, slot, "latest"]))
            .await
            .map_err(|e| AnalysisError::ChainRead(e.to_string()))?;
        result
            .as_str()
            .and_then(|s| s.parse::<B256>().ok())
            .ok_or_else(|| AnalysisError::ChainRead("malformed storage word".into()))
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, AnalysisError> {
        let result = self
            .sandbox_call("eth_getCode", json!([address, "latest"]))
            .await
            .map_err(|e| AnalysisError::ChainRead(e.to_string()))?;
        result
            .as_str()
            .and_then(|s| s.parse::<Bytes>().ok())
            .ok_or_else(|| AnalysisError::ChainRead("malformed code response".into()))
    }
}

fn hex_quantity(value: &Value) -> Result<u64, SimulationError> {
    let text = value
        .as_str()
        .ok_or_else(|| SimulationError::Transport("expected hex quantity".into()))?;
    u64::from_str_radix(text.trim_start_matches("0x"), 16)
        .map_err(|e| SimulationError::Transport(format!("bad hex quantity {text}: {e}")))
}

fn parse_b256(value: &Value) -> Result<B256, SimulationError> {
    value
        .as_str()
        .and_then(|s| s.parse::<B256>().ok())
        .ok_or_else(|| SimulationError::Transport("expected 32-byte hash".into()))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_quantities_parse() {
        assert_eq!(hex_quantity(&json!("0x10")).unwrap(), 16);
        assert_eq!(hex_quantity(&json!("0x0")).unwrap(), 0);
        assert!(hex_quantity(&json!(12)).is_err());
    }

    #[test]
    fn sandbox_transaction_deserializes_hardhat_shape() {
        let raw = json!({
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "from": "0x00000000000000000000000000000000000000aa",
            "to": "0x00000000000000000000000000000000000000bb",
            "value": "0xde0b6b3a7640000",
            "gas": "0x5208",
            "gasPrice": "0x3b9aca00",
            "input": "0xa9059cbb",
            "nonce": "0x0",
            "chainId": "0x1",
            "type": "0x0",
            "blockHash": null,
            "v": "0x26"
        });
        let tx: SandboxTransaction = serde_json::from_value(raw).unwrap();
        assert!(tx.to.is_some());
        assert_eq!(tx.effective_gas_price(), Some(U256::from(1_000_000_000u64)));
        assert_eq!(tx.nonce, U256::ZERO);
    }

    #[test]
    fn contract_creation_has_no_recipient() {
        let raw = json!({
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "from": "0x00000000000000000000000000000000000000aa",
            "to": null,
            "value": "0x0",
            "gas": "0x5208",
            "maxFeePerGas": "0x3b9aca00",
            "input": "0x6080",
            "nonce": "0x1",
            "type": "0x2"
        });
        let tx: SandboxTransaction = serde_json::from_value(raw).unwrap();
        assert!(tx.to.is_none());
        assert_eq!(tx.effective_gas_price(), Some(U256::from(1_000_000_000u64)));
    }

    #[test]
    fn receipt_logs_deserialize() {
        let raw = json!({
            "status": "0x1",
            "logs": [{
                "logIndex": "0x0",
                "address": "0x00000000000000000000000000000000000000cc",
                "topics": [
                    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
                ],
                "data": "0x00000000000000000000000000000000000000000000000000000000000003e8"
            }]
        });
        let receipt: Receipt = serde_json::from_value(raw).unwrap();
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].topics.len(), 1);
    }
}
