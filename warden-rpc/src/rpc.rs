//! JSON-RPC firewall — holds transaction submissions for human review,
//! passes every other method through to the upstream node.
//!
//! A submission is simulated in the sandbox fork, recorded as a pending
//! ledger row, and answered with the hash the fork assigned, so the
//! submitting wallet believes the transaction was accepted and starts
//! polling for a receipt. The receipt appears on the real chain only
//! after the watching user confirms; a rejection surfaces as a nonce
//! error on the next receipt poll.

use crate::config::Config;
use crate::error::WardenError;
use crate::ledger::{Admission, Ledger, Status};
use crate::notify::Notifier;
use crate::sandbox::SandboxClient;
use crate::simulator::{recover_sender, Simulation, Simulator};
use crate::types::{JsonRpcRequest, JsonRpcResponse};
use alloy_primitives::{Bytes, B256};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use warden_analyzer::cache::AnalysisCache;
use warden_analyzer::decompiler::DecompilerClient;
use warden_analyzer::pipeline::AnalysisContext;
use warden_analyzer::textgen::TextGenClient;

/// Methods that broadcast a transaction and therefore must be held.
pub const TX_METHODS: &[&str] = &[
    "eth_sendRawTransaction",
    "eth_sendTransaction",
    "personal_sendTransaction",
];

/// Shared state behind every HTTP handler.
pub struct AppState {
    pub config: Config,
    pub ledger: Ledger,
    pub simulator: Simulator<SandboxClient>,
    pub notifier: Notifier,
    pub http: reqwest::Client,
    /// Chain reads for the analysis pipeline (proxy slots, bytecode).
    pub chain: SandboxClient,
    pub analysis: AnalysisContext,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let chain = SandboxClient::new(&config);
        let simulator = Simulator::new(
            chain.clone(),
            config.safety_margin,
            Duration::from_secs(config.receipt_timeout_secs),
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_secs))
            .build()
            .unwrap_or_default();
        let analysis = AnalysisContext {
            cache: AnalysisCache::new(),
            decompiler: DecompilerClient::new(
                config.decompiler_url.clone(),
                Duration::from_secs(config.decompiler_timeout_secs),
            ),
            textgen: TextGenClient::new(
                config.textgen_url.clone(),
                config.textgen_api_key.clone(),
                Duration::from_secs(config.rpc_timeout_secs),
            ),
            model: config.textgen_model.clone(),
        };
        Self {
            config: config.clone(),
            ledger: Ledger::new(),
            simulator,
            notifier: Notifier::new(config.notifier_url),
            http,
            chain,
            analysis,
        }
    }
}

/// How the router treats one request.
#[derive(Debug, PartialEq, Eq)]
enum Disposition {
    /// A send method, intercepted and held.
    Submission,
    /// A receipt poll, answered locally for held hashes.
    ReceiptQuery,
    /// Everything else relays to the upstream verbatim.
    Passthrough,
}

fn classify(method: &str) -> Disposition {
    if TX_METHODS.contains(&method) {
        Disposition::Submission
    } else if method == "eth_getTransactionReceipt" {
        Disposition::ReceiptQuery
    } else {
        Disposition::Passthrough
    }
}

/// Entry point for the JSON-RPC surface. Handles both single requests
/// and batch arrays; a batch answers element-by-element in order.
pub async fn handle_rpc(state: &Arc<AppState>, body: Value) -> Value {
    match body {
        Value::Array(batch) => {
            let mut responses = Vec::with_capacity(batch.len());
            for element in batch {
                responses.push(handle_single(state, element).await);
            }
            Value::Array(responses)
        }
        single => handle_single(state, single).await,
    }
}

async fn handle_single(state: &Arc<AppState>, body: Value) -> Value {
    let envelope = body.clone();
    let req: JsonRpcRequest = match serde_json::from_value(body) {
        Ok(req) => req,
        Err(e) => {
            return JsonRpcResponse::error(Value::Null, -32600, format!("invalid request: {e}"))
                .into_value()
        }
    };

    match classify(&req.method) {
        Disposition::Submission => handle_submission(state, req, envelope).await.into_value(),
        Disposition::ReceiptQuery => handle_receipt_query(state, req, envelope).await,
        Disposition::Passthrough => proxy_to_upstream(state, &req, envelope).await,
    }
}

/// Receipt polls for a held hash never reach the upstream: pending rows
/// answer `null` so the wallet keeps waiting, rejected rows answer the
/// same nonce error the real node would eventually give, and confirmed
/// rows fall through to the upstream where the relayed transaction
/// lives.
async fn handle_receipt_query(state: &Arc<AppState>, req: JsonRpcRequest, envelope: Value) -> Value {
    let hash = req
        .first_param_str()
        .and_then(|s| s.parse::<B256>().ok());

    if let Some(hash) = hash {
        if let Some(tx) = state.ledger.find_by_hash(hash) {
            match tx.status {
                Status::Pending => {
                    return JsonRpcResponse::success(req.id, Value::Null).into_value()
                }
                Status::Rejected => return JsonRpcResponse::nonce_too_low(req.id).into_value(),
                Status::Confirmed => {}
            }
        }
    }
    proxy_to_upstream(state, &req, envelope).await
}

async fn handle_submission(
    state: &Arc<AppState>,
    req: JsonRpcRequest,
    envelope: Value,
) -> JsonRpcResponse {
    let Some(raw_hex) = req.first_param_str() else {
        return JsonRpcResponse::error(req.id, -32602, "missing raw transaction parameter");
    };
    let raw = match hex::decode(raw_hex.trim_start_matches("0x")) {
        Ok(raw) => raw,
        Err(e) => {
            return JsonRpcResponse::error(req.id, -32602, format!("malformed raw transaction: {e}"))
        }
    };
    let raw_data = Bytes::from(raw.clone());

    // Re-submissions of a payload we already hold or already decided on
    // never re-simulate. A decided rejection answers the same nonce
    // error as a receipt poll would.
    if let Some(existing) = state.ledger.find_by_raw(&raw_data) {
        info!(id = existing.id, status = %existing.status, "duplicate submission");
        return match existing.status {
            Status::Rejected => JsonRpcResponse::nonce_too_low(req.id),
            Status::Pending | Status::Confirmed => JsonRpcResponse::success(
                req.id,
                Value::String(format!("{:#x}", existing.transaction_hash)),
            ),
        };
    }

    // The sender must be watched by someone, otherwise nobody could
    // ever approve the transaction.
    let sender = match recover_sender(&raw) {
        Ok(sender) => sender,
        Err(e) => return JsonRpcResponse::error(req.id, -32602, e.to_string()),
    };
    let Some(watcher) = state.ledger.watcher_of(sender) else {
        warn!(%sender, "submission from unwatched address");
        return JsonRpcResponse::error(
            req.id,
            -32000,
            format!("sender {sender} is not watched by any user"),
        );
    };

    let simulation = match state.simulator.simulate(&raw).await {
        Ok(simulation) => simulation,
        Err(e) => {
            warn!(%sender, error = %e, "simulation failed");
            return JsonRpcResponse::error(req.id, -32603, WardenError::from(e).to_string());
        }
    };

    let admission = admit(state, raw_data, watcher, envelope, simulation);
    let tx = match admission {
        Admission::Created(tx) => {
            notify_watcher(state, watcher, tx.id);
            tx
        }
        Admission::Existing(tx) => tx,
    };

    JsonRpcResponse::success(req.id, Value::String(format!("{:#x}", tx.transaction_hash)))
}

fn admit(
    state: &Arc<AppState>,
    raw_data: Bytes,
    watcher: i64,
    envelope: Value,
    simulation: Simulation,
) -> Admission {
    let logs = serde_json::to_value(&simulation.logs).unwrap_or(Value::Null);
    state.ledger.create_or_get(
        raw_data,
        simulation.transaction_hash,
        simulation.sender,
        watcher,
        envelope,
        simulation.transaction,
        logs,
        simulation.trace,
    )
}

/// Kicks the chat bot without blocking the submission response.
fn notify_watcher(state: &Arc<AppState>, watcher: i64, tx_id: u64) {
    let Some(user) = state.ledger.get_user(watcher) else {
        warn!(watcher, tx_id, "watcher has no user record, skipping notification");
        return;
    };
    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        notifier.transaction_held(user.chat_id, tx_id).await;
    });
}

/// Relays the original envelope untouched, so params, extra fields, and
/// the id all survive exactly as the wallet sent them.
async fn proxy_to_upstream(state: &Arc<AppState>, req: &JsonRpcRequest, envelope: Value) -> Value {
    match state
        .http
        .post(&state.config.upstream_rpc_url)
        .json(&envelope)
        .send()
        .await
    {
        Ok(response) => match response.json::<Value>().await {
            Ok(body) => body,
            Err(e) => JsonRpcResponse::error(
                req.id.clone(),
                -32603,
                format!("upstream returned malformed body: {e}"),
            )
            .into_value(),
        },
        Err(e) => JsonRpcResponse::error(
            req.id.clone(),
            -32603,
            format!("upstream unreachable: {e}"),
        )
        .into_value(),
    }
}

// ── Tests ────────────────────────────────────────────────────────
