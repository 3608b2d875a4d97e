//! Operator HTTP API.
//!
//!   GET  /health                 - liveness, network and runtime flavour
//!   GET  /rpc/health             - per-endpoint pool health
//!   GET  /network/info           - fresh getServerInfo
//!   GET  /balance/{address}      - fresh getBalanceByAddress
//!   GET  /agent/state/{address}  - agent state or null
//!   GET  /agent/list             - every known agent
//!   POST /agent/start            - {address, mode?, intervalSeconds?}
//!   POST /agent/stop             - {address}
//!   GET  /metrics                - Prometheus text exposition

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;

use forgeos_protocol::units::sompi_to_kas_string;
use forgeos_rpc::{EndpointHealth, KaspaRpc, RpcError, RpcPool};
use forgeos_runtime::{AgentMode, AgentRuntime, RuntimeError, RuntimeMetrics, StartAgent};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

// ============================================================================
// Node backend
// ============================================================================

/// RPC access plus the health view the operator API reports.
pub trait NodeBackend: KaspaRpc {
    fn health_status(&self) -> Vec<EndpointHealth>;
}

impl<C: KaspaRpc + 'static> NodeBackend for RpcPool<C> {
    fn health_status(&self) -> Vec<EndpointHealth> {
        self.get_health_status()
    }
}

// ============================================================================
// Shared API state
// ============================================================================

struct ApiInner {
    node:    Arc<dyn NodeBackend>,
    runtime: Arc<dyn AgentRuntime>,
    metrics: Arc<RuntimeMetrics>,
    network: String,
}

/// Cheaply cloneable shared state passed to all axum handlers.
#[derive(Clone)]
pub struct ApiState(Arc<ApiInner>);

impl ApiState {
    pub fn new(
        node:    Arc<dyn NodeBackend>,
        runtime: Arc<dyn AgentRuntime>,
        metrics: Arc<RuntimeMetrics>,
        network: String,
    ) -> Self {
        Self(Arc::new(ApiInner { node, runtime, metrics, network }))
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status:  StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl From<RpcError> for ApiError {
    fn from(e: RpcError) -> Self {
        let status = StatusCode::from_u16(e.status()).unwrap_or(StatusCode::BAD_GATEWAY);
        Self::new(status, e.to_string())
    }
}

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        tracing::error!(error = %e, "Agent runtime request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn required_address(raw: &str) -> Result<String, ApiError> {
    let address = raw.trim();
    if address.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "address is required"));
    }
    Ok(address.to_owned())
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub address:          String,
    #[serde(default)]
    pub mode:             AgentMode,
    pub interval_seconds: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub address: String,
}

// ============================================================================
// Server
// ============================================================================

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health",                 get(health))
        .route("/rpc/health",             get(rpc_health))
        .route("/network/info",           get(network_info))
        .route("/balance/{address}",      get(balance))
        .route("/agent/state/{address}",  get(agent_state))
        .route("/agent/list",             get(agent_list))
        .route("/agent/start",            post(agent_start))
        .route("/agent/stop",             post(agent_stop))
        .route("/metrics",                get(metrics))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(
    state:    ApiState,
    addr:     SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let distributed = state.0.runtime.is_distributed();
    let store = if distributed { "redis" } else { "memory" };
    Json(json!({
        "status":  "ok",
        "network": state.0.network,
        "runtime": {
            "store":       store,
            "distributed": distributed,
        },
        "timestamp": timestamp(),
    }))
}

async fn rpc_health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "network":   state.0.network,
        "endpoints": state.0.node.health_status(),
        "timestamp": timestamp(),
    }))
}

async fn network_info(State(state): State<ApiState>) -> ApiResult {
    let info = state.0.node.get_server_info().await?;
    Ok(Json(json!({
        "network":   state.0.network,
        "node":      info,
        "timestamp": timestamp(),
    })))
}

async fn balance(
    Path(address): Path<String>,
    State(state):  State<ApiState>,
) -> ApiResult {
    let address = required_address(&address)?;
    let sompi = state.0.node.get_balance_by_address(&address).await?;
    Ok(Json(json!({
        "address":      address,
        "network":      state.0.network,
        "balanceSompi": sompi.to_string(),
        "balanceKas":   sompi_to_kas_string(sompi),
        "timestamp":    timestamp(),
    })))
}

async fn agent_state(
    Path(address): Path<String>,
    State(state):  State<ApiState>,
) -> ApiResult {
    let address = required_address(&address)?;
    let agent = state.0.runtime.get(&address).await?;
    Ok(Json(json!({
        "address":   address,
        "network":   state.0.network,
        "state":     agent,
        "timestamp": timestamp(),
    })))
}

async fn agent_list(State(state): State<ApiState>) -> ApiResult {
    let agents = state.0.runtime.list().await?;
    Ok(Json(json!({
        "network":   state.0.network,
        "agents":    agents,
        "timestamp": timestamp(),
    })))
}

async fn agent_start(
    State(state): State<ApiState>,
    Json(req):    Json<StartRequest>,
) -> ApiResult {
    let address = required_address(&req.address)?;
    let agent = state
        .0
        .runtime
        .start(StartAgent {
            address,
            network:          state.0.network.clone(),
            mode:             req.mode,
            interval_seconds: req.interval_seconds,
        })
        .await?;
    tracing::info!(address = %agent.address, mode = ?agent.mode, "Agent started");
    Ok(Json(json!({
        "network":   state.0.network,
        "state":     agent,
        "timestamp": timestamp(),
    })))
}

async fn agent_stop(
    State(state): State<ApiState>,
    Json(req):    Json<StopRequest>,
) -> ApiResult {
    let address = required_address(&req.address)?;
    let Some(agent) = state.0.runtime.stop(&address).await? else {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "No runtime found for wallet"));
    };
    tracing::info!(address = %agent.address, "Agent stopped");
    Ok(Json(json!({
        "network":   state.0.network,
        "state":     agent,
        "timestamp": timestamp(),
    })))
}

async fn metrics(State(state): State<ApiState>) -> Response {
    match state.0.metrics.encode() {
        Ok(text) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], text).into_response(),
        Err(e) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
