//! Fork-based transaction simulation.
//!
//! One simulation runs at a time. Each run re-forks the sandbox from a
//! safety margin below the real chain head, snapshots, broadcasts the
//! raw transaction, collects transaction details, receipt logs and the
//! instruction trace, then reverts the snapshot whether or not any of
//! those steps succeeded. A revert failure marks the sandbox poisoned
//! for that run; the next run re-forks from scratch anyway.

use crate::error::SimulationError;
use crate::sandbox::{RawLog, Sandbox, SandboxTransaction};
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{sol, SolEvent};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::rlp::Rlp;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use warden_analyzer::trace::InstructionTrace;

sol! {
    event Transfer(address indexed sender, address indexed recipient, uint256 amount);
    event Approval(address indexed owner, address indexed spender, uint256 amount);
}

/// A decoded event from the simulated receipt. Unknown event shapes
/// keep their raw topics and data.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedLog {
    pub address: Address,
    pub event: Option<String>,
    pub args: Option<Value>,
    pub topics: Vec<B256>,
    pub data: alloy_primitives::Bytes,
}

/// Everything simulation learned about one raw transaction.
#[derive(Debug, Clone, Serialize)]
pub struct Simulation {
    pub transaction_hash: B256,
    pub sender: Address,
    pub transaction: SandboxTransaction,
    pub logs: Vec<DecodedLog>,
    #[serde(skip)]
    pub trace: InstructionTrace,
}

pub struct Simulator<C: Sandbox> {
    sandbox: C,
    /// Serializes simulations. The sandbox holds a single fork and a
    /// single snapshot, so two concurrent runs would corrupt each
    /// other's state.
    gate: Mutex<()>,
    safety_margin: u64,
    receipt_timeout: Duration,
}

impl<C: Sandbox> Simulator<C> {
    pub fn new(sandbox: C, safety_margin: u64, receipt_timeout: Duration) -> Self {
        Self {
            sandbox,
            gate: Mutex::new(()),
            safety_margin,
            receipt_timeout,
        }
    }

    /// Runs one raw transaction inside a fresh fork and reports what it
    /// would do. The fork never keeps the transaction: the snapshot is
    /// reverted on every exit path.
    pub async fn simulate(&self, raw: &[u8]) -> Result<Simulation, SimulationError> {
        let sender = recover_sender(raw)?;

        let _guard = self.gate.lock().await;

        let head = self.sandbox.latest_real_block().await?;
        let fork_block = head.saturating_sub(self.safety_margin);
        debug!(head, fork_block, "forking sandbox");
        self.sandbox.reset_fork(fork_block).await?;

        let handle = self.sandbox.snapshot().await?;
        let outcome = self.run_in_fork(raw, sender).await;

        // Revert and re-fork regardless of how the run went: the next
        // simulation must start from a baseline the held transaction
        // never touched.
        let cleanup = async {
            self.sandbox.revert(&handle).await?;
            self.sandbox.reset_fork(fork_block).await
        }
        .await;
        if let Err(cleanup_err) = cleanup {
            error!(error = %cleanup_err, "sandbox cleanup failed, fork state is stale");
            return match outcome {
                Ok(_) => Err(SimulationError::SandboxPoisoned(cleanup_err.to_string())),
                Err(e) => Err(e),
            };
        }

        let simulation = outcome?;
        info!(
            hash = %simulation.transaction_hash,
            sender = %simulation.sender,
            logs = simulation.logs.len(),
            "simulation complete"
        );
        Ok(simulation)
    }

    async fn run_in_fork(
        &self,
        raw: &[u8],
        sender: Address,
    ) -> Result<Simulation, SimulationError> {
        let hash = self.sandbox.send_raw_transaction(raw).await?;
        let receipt = self.sandbox.wait_for_receipt(hash, self.receipt_timeout).await?;
        let transaction = self.sandbox.get_transaction(hash).await?;
        let trace = self.sandbox.get_trace(hash).await?;

        let logs = receipt.logs.iter().map(decode_known_log).collect();

        Ok(Simulation {
            transaction_hash: hash,
            sender,
            transaction,
            logs,
            trace,
        })
    }

    /// Re-forks the sandbox at the current real chain head. Called
    /// after a transaction is confirmed and relayed, so follow-up
    /// simulations see it once it lands.
    pub async fn re_anchor(&self) -> Result<(), SimulationError> {
        let _guard = self.gate.lock().await;
        let head = self.sandbox.latest_real_block().await?;
        info!(head, "re-anchoring sandbox fork");
        self.sandbox.reset_fork(head).await
    }
}

/// Recovers the signer of an RLP-encoded signed transaction without
/// touching any node.
pub fn recover_sender(raw: &[u8]) -> Result<Address, SimulationError> {
    let (tx, signature): (TypedTransaction, _) = TypedTransaction::decode_signed(&Rlp::new(raw))
        .map_err(|e| SimulationError::Decode(e.to_string()))?;
    let signer = signature
        .recover(tx.sighash())
        .map_err(|e| SimulationError::Decode(e.to_string()))?;
    Ok(Address::from_slice(signer.as_bytes()))
}

/// Decodes ERC-20 Transfer and Approval events into named arguments;
/// anything else passes through with raw topics intact.
pub fn decode_known_log(log: &RawLog) -> DecodedLog {
    let decoded = log.topics.first().and_then(|topic0| {
        if *topic0 == Transfer::SIGNATURE_HASH {
            Transfer::decode_log_data(&as_log_data(log), true)
                .ok()
                .map(|ev| {
                    (
                        "Transfer".to_string(),
                        json!({
                            "from": ev.sender.to_checksum(None),
                            "to": ev.recipient.to_checksum(None),
                            "value": decimal(ev.amount),
                        }),
                    )
                })
        } else if *topic0 == Approval::SIGNATURE_HASH {
            Approval::decode_log_data(&as_log_data(log), true)
                .ok()
                .map(|ev| {
                    (
                        "Approval".to_string(),
                        json!({
                            "owner": ev.owner.to_checksum(None),
                            "spender": ev.spender.to_checksum(None),
                            "value": decimal(ev.amount),
                        }),
                    )
                })
        } else {
            None
        }
    });

    let (event, args) = match decoded {
        Some((name, args)) => (Some(name), Some(args)),
        None => (None, None),
    };
    DecodedLog {
        address: log.address,
        event,
        args,
        topics: log.topics.clone(),
        data: log.data.clone(),
    }
}

fn as_log_data(log: &RawLog) -> alloy_primitives::LogData {
    alloy_primitives::LogData::new_unchecked(log.topics.clone(), log.data.clone())
}

fn decimal(value: U256) -> String {
    value.to_string()
}

// ── Tests ────────────────────────────────────────────────────────
