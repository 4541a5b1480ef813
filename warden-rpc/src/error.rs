//! Error taxonomy for the firewall.
//!
//! Everything externally triggered is caught at the router or admin
//! boundary and converted into a JSON-RPC error object or a
//! `{"status": "error"}` body; no internal representation crosses the
//! wire. A duplicate submission is a policy branch, not an error.

use crate::ledger::Status;
use alloy_primitives::B256;
use thiserror::Error;
use warden_analyzer::AnalysisError;

#[derive(Debug, Error)]
pub enum WardenError {
    /// Malformed input or unknown user/address; recovered locally and
    /// surfaced as a user-facing message.
    #[error("{0}")]
    Validation(String),

    /// The transaction id does not exist in the ledger. Kept distinct
    /// from an illegal transition on an existing entry.
    #[error("unknown transaction id {0}")]
    UnknownTransaction(u64),

    /// Confirm/reject attempted on an entry that already left `Pending`.
    #[error("transaction {id} is {status}, not pending")]
    InvalidTransition { id: u64, status: Status },

    #[error("simulation failed: {0}")]
    Simulation(#[from] SimulationError),

    /// Real-node passthrough or relay failure.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
}

#[derive(Debug, Error)]
pub enum SimulationError {
    /// The sandbox (or the real node, for the fork anchor) could not be
    /// reached or answered with a malformed body.
    #[error("sandbox transport error: {0}")]
    Transport(String),

    /// The sandbox answered with a JSON-RPC error, e.g. a revert during
    /// execution.
    #[error("sandbox rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The raw payload could not be RLP-decoded or its signature could
    /// not be recovered.
    #[error("failed to decode transaction: {0}")]
    Decode(String),

    #[error("timed out waiting for receipt of {0}")]
    ReceiptTimeout(B256),

    /// The post-simulation revert itself failed: the shared fork is now
    /// in an unknown state and needs operator intervention. Logged
    /// distinctly from ordinary simulation failures.
    #[error("sandbox left in unknown state: {0}")]
    SandboxPoisoned(String),
}
