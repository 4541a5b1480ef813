//! HTTP surface: the JSON-RPC entry point plus the admin API the
//! approval bot drives.
//!
//! The bot registers users, manages watched addresses, lists what is
//! pending, and delivers the confirm/reject verdicts. Every admin
//! response carries a `status` field so the bot can branch without
//! inspecting HTTP codes.

use crate::error::WardenError;
use crate::ledger::PendingTransaction;
use crate::rpc::{self, AppState};
use alloy_primitives::Address;
use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ── Request / Response Types ────────────────────────────────────

#[derive(Deserialize)]
pub struct NewUserRequest {
    pub user_id: i64,
    pub chat_id: i64,
}

#[derive(Deserialize)]
pub struct UserQuery {
    pub user_id: i64,
}

#[derive(Deserialize)]
pub struct AddressRequest {
    pub user_id: i64,
    pub address: Address,
}

#[derive(Deserialize)]
pub struct TransactionQuery {
    pub tx_id: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: String,
}

impl StatusResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: "success",
            message: message.into(),
        })
    }
}

#[derive(Serialize)]
pub struct UserIdResponse {
    pub status: &'static str,
    pub user_id: u64,
    pub chat_id: i64,
}

#[derive(Serialize)]
pub struct AddressesResponse {
    pub status: &'static str,
    pub addresses: Vec<Address>,
}

#[derive(Serialize)]
pub struct PendingIdsResponse {
    pub status: &'static str,
    pub transaction_ids: Vec<u64>,
}

#[derive(Serialize)]
pub struct TransactionResponse {
    pub status: &'static str,
    pub transaction: PendingTransaction,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// Maps the internal taxonomy onto HTTP codes the bot understands.
#[derive(Debug)]
struct AdminError(WardenError);

impl From<WardenError> for AdminError {
    fn from(e: WardenError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            WardenError::Validation(_) => StatusCode::BAD_REQUEST,
            WardenError::UnknownTransaction(_) => StatusCode::NOT_FOUND,
            WardenError::InvalidTransition { .. } => StatusCode::CONFLICT,
            WardenError::Simulation(_) | WardenError::Upstream(_) | WardenError::Analysis(_) => {
                StatusCode::BAD_GATEWAY
            }
        };
        let body = Json(StatusResponse {
            status: "error",
            message: self.0.to_string(),
        });
        (code, body).into_response()
    }
}

// ── Handlers ────────────────────────────────────────────────────

async fn rpc_entry(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Json<Value> {
    Json(rpc::handle_rpc(&state, body).await)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "warden-rpc",
    })
}

async fn new_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewUserRequest>,
) -> Json<UserIdResponse> {
    let user = state.ledger.register_user(req.user_id, req.chat_id);
    Json(UserIdResponse {
        status: "success",
        user_id: user.id,
        chat_id: user.chat_id,
    })
}

async fn get_user_id(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserQuery>,
) -> Result<Json<UserIdResponse>, AdminError> {
    let user = state
        .ledger
        .get_user(req.user_id)
        .ok_or_else(|| WardenError::Validation(format!("unknown user {}", req.user_id)))?;
    Ok(Json(UserIdResponse {
        status: "success",
        user_id: user.id,
        chat_id: user.chat_id,
    }))
}

async fn add_address(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddressRequest>,
) -> Result<Json<StatusResponse>, AdminError> {
    state.ledger.watch_address(req.user_id, req.address)?;
    Ok(StatusResponse::ok(format!("watching {}", req.address)))
}

async fn remove_address(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddressRequest>,
) -> Result<Json<StatusResponse>, AdminError> {
    state.ledger.unwatch_address(req.user_id, req.address)?;
    Ok(StatusResponse::ok(format!("stopped watching {}", req.address)))
}

async fn get_user_addresses(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserQuery>,
) -> Json<AddressesResponse> {
    Json(AddressesResponse {
        status: "success",
        addresses: state.ledger.addresses_of(req.user_id),
    })
}

/// The bot only needs ids here; it fetches details per id when the
/// user opens one.
async fn get_pending_transactions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserQuery>,
) -> Json<PendingIdsResponse> {
    let transaction_ids = state
        .ledger
        .pending_for(req.user_id)
        .iter()
        .map(|tx| tx.id)
        .collect();
    Json(PendingIdsResponse {
        status: "success",
        transaction_ids,
    })
}

async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransactionQuery>,
) -> Result<Json<TransactionResponse>, AdminError> {
    let tx = state
        .ledger
        .get(req.tx_id)
        .ok_or(WardenError::UnknownTransaction(req.tx_id))?;
    Ok(Json(TransactionResponse {
        status: "success",
        transaction: tx,
    }))
}

/// The status flip is the commit point. Once the row reads `Confirmed`
/// the decision stands: a relay or re-anchor failure afterwards is
/// reported in the message, never rolled back, so a retry cannot
/// double-spend through a second flip.
async fn confirm_transaction(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransactionQuery>,
) -> Result<Json<StatusResponse>, AdminError> {
    let tx = state.ledger.confirm(req.tx_id)?;
    info!(id = tx.id, hash = %tx.transaction_hash, "relaying confirmed transaction");

    if let Err(e) = relay_original(&state, &tx).await {
        error!(id = tx.id, error = %e, "relay of confirmed transaction failed");
        return Ok(StatusResponse::ok(format!(
            "transaction {} confirmed, but relay failed: {e}",
            tx.id
        )));
    }

    // Re-fork at the head so follow-up simulations build on the relayed
    // transaction once it lands.
    if let Err(e) = state.simulator.re_anchor().await {
        warn!(id = tx.id, error = %e, "fork re-anchor failed after relay");
        return Ok(StatusResponse::ok(format!(
            "transaction {} confirmed and relayed, but re-anchor failed: {e}",
            tx.id
        )));
    }

    Ok(StatusResponse::ok(format!(
        "transaction {} confirmed and relayed",
        tx.id
    )))
}

async fn reject_transaction(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransactionQuery>,
) -> Result<Json<StatusResponse>, AdminError> {
    let tx = state.ledger.reject(req.tx_id)?;
    Ok(StatusResponse::ok(format!("transaction {} rejected", tx.id)))
}

/// Runs the static-analysis pipeline over the trace captured at
/// simulation time. Works for any stored transaction regardless of
/// status; results are cached per bytecode so repeat calls are cheap.
async fn analyze_transaction(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransactionQuery>,
) -> Result<Json<Value>, AdminError> {
    let tx = state
        .ledger
        .get(req.tx_id)
        .ok_or(WardenError::UnknownTransaction(req.tx_id))?;
    let report = warden_analyzer::pipeline::analyze(&tx.trace, &state.chain, &state.analysis)
        .await
        .map_err(WardenError::from)?;
    let mut body = serde_json::to_value(&report)
        .map_err(|e| WardenError::Validation(e.to_string()))?;
    if let Some(object) = body.as_object_mut() {
        object.insert("status".into(), Value::String("success".into()));
    }
    Ok(Json(body))
}

/// Replays the stored submission envelope against the real node. The
/// raw payload and request id reach the network exactly as the wallet
/// sent them.
async fn relay_original(state: &Arc<AppState>, tx: &PendingTransaction) -> Result<(), WardenError> {
    let response = state
        .http
        .post(&state.config.upstream_rpc_url)
        .json(&tx.original_request)
        .send()
        .await
        .map_err(|e| WardenError::Upstream(e.to_string()))?;
    let body: Value = response
        .json()
        .await
        .map_err(|e| WardenError::Upstream(e.to_string()))?;
    if let Some(error) = body.get("error") {
        return Err(WardenError::Upstream(
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown upstream error")
                .to_string(),
        ));
    }
    Ok(())
}

// ── Router ──────────────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(health).post(rpc_entry))
        .route("/health", get(health))
        .route("/new_user", post(new_user))
        .route("/get_user_id", post(get_user_id))
        .route("/add_address", post(add_address))
        .route("/remove_address", post(remove_address))
        .route("/get_user_addresses", post(get_user_addresses))
        .route("/get_pending_transactions", post(get_pending_transactions))
        .route("/get_transaction", post(get_transaction))
        .route("/confirm-transaction", post(confirm_transaction))
        .route("/reject-transaction", post(reject_transaction))
        .route("/analyze-transaction", post(analyze_transaction))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ── Tests ───────────────────────────────────────────────────────
