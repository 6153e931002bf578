//! HTTP API over the reward engine
//!
//! Mutating routes identify the caller through the `x-account` header
//! (64 hex characters). Authentication of that header is left to the
//! deployment in front of the node.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uptime_rewards::{
    BreakerStatus, ClaimReceipt, ClaimStatus, ErrorKind, MigrationReport, MigrationStatus,
    ParamsUpdate, RewardEngine, RewardError, RewardEvent, SubmissionReceipt,
};
use uptime_types::{decode_id, encode_id, AccountId, HexId, PeriodIndex, PoolId, RewardParams, Tokens};

use crate::version::UPTIME_NODE_VERSION;

pub const ACCOUNT_HEADER: &str = "x-account";

const DEFAULT_EVENT_LIMIT: usize = 100;

pub struct ApiState {
    pub engine: Arc<RewardEngine>,
    pub metrics: Option<PrometheusHandle>,
    started_at: Instant,
}

impl ApiState {
    pub fn new(engine: Arc<RewardEngine>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            engine,
            metrics,
            started_at: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<ApiState>;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

impl From<RewardError> for ApiError {
    fn from(err: RewardError) -> Self {
        let status = match (&err, err.kind()) {
            (RewardError::CircuitBreakerTripped { .. }, _) => StatusCode::SERVICE_UNAVAILABLE,
            (RewardError::NotOwner { .. }, _) => StatusCode::FORBIDDEN,
            (_, ErrorKind::Authorization) => StatusCode::FORBIDDEN,
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::Membership) => StatusCode::NOT_FOUND,
            (_, ErrorKind::State) => StatusCode::CONFLICT,
            (_, ErrorKind::Resource) => StatusCode::BAD_GATEWAY,
            (_, ErrorKind::Storage) => {
                error!("Reward store failure: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

/// Run an engine call that writes to the store on the blocking pool.
async fn run_blocking<T, F>(state: &SharedState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&RewardEngine) -> uptime_rewards::Result<T> + Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    let outcome = tokio::task::spawn_blocking(move || call(&engine))
        .await
        .map_err(|err| {
            error!("Engine task failed: {err}");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "engine task failed")
        })?;
    outcome.map_err(ApiError::from)
}

fn caller(headers: &HeaderMap) -> Result<AccountId, ApiError> {
    let value = headers
        .get(ACCOUNT_HEADER)
        .ok_or_else(|| ApiError::unauthorized(format!("missing {ACCOUNT_HEADER} header")))?;
    let text = value
        .to_str()
        .map_err(|_| ApiError::bad_request(format!("{ACCOUNT_HEADER} header is not ASCII")))?;
    decode_id(text)
        .map_err(|err| ApiError::bad_request(format!("invalid {ACCOUNT_HEADER} header: {err}")))
}

// -------------------------
// Request / response bodies
// -------------------------

#[derive(Debug, Deserialize)]
struct SubmitOnlineRequest {
    pool: PoolId,
    peers: Vec<HexId>,
    /// Defaults to the node clock
    #[serde(default)]
    timestamp: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ParticipantQuery {
    account: HexId,
    peer: HexId,
    pool: PoolId,
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    peer: HexId,
    pool: PoolId,
    /// `0` or absent uses the default claim size
    #[serde(default)]
    max_periods: u64,
}

#[derive(Debug, Deserialize)]
struct MigrateRequest {
    #[serde(default)]
    max_participants: u64,
}

#[derive(Debug, Deserialize)]
struct WithdrawRequest {
    pool: PoolId,
    to: HexId,
    amount: Tokens,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EligibleResponse {
    account: HexId,
    peer: HexId,
    pool: PoolId,
    eligible: Tokens,
}

#[derive(Debug, Serialize)]
struct OnlinePeersResponse {
    pool: PoolId,
    period: PeriodIndex,
    peers: Vec<HexId>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    now: u64,
    circuit_breaker: BreakerStatus,
    total_distributed: Tokens,
    total_claims: u64,
    custody_available: Tokens,
}

// -------------------------
// Server
// -------------------------

pub async fn start_server<F>(state: ApiState, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(Arc::new(state));
    let listener = bind_listener(addr).await?;
    info!("HTTP API listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {addr}"))
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/v1/params", get(handle_get_params))
        .route("/v1/events", get(handle_events))
        .route("/v1/online-status", post(handle_submit_online))
        .route("/v1/online-status/:pool/:period", get(handle_online_peers))
        .route("/v1/eligible", get(handle_eligible))
        .route("/v1/claim-status", get(handle_claim_status))
        .route("/v1/claim", post(handle_claim))
        .route("/v1/admin/params", post(handle_update_params))
        .route("/v1/admin/circuit-breaker", get(handle_breaker_status))
        .route("/v1/admin/circuit-breaker/trip", post(handle_trip_breaker))
        .route("/v1/admin/circuit-breaker/reset", post(handle_reset_breaker))
        .route("/v1/migration", get(handle_migration_status))
        .route("/v1/admin/migrate", post(handle_migrate))
        .route("/v1/admin/emergency-withdraw", post(handle_emergency_withdraw))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// -------------------------
// Handlers
// -------------------------

async fn handle_health(State(state): State<SharedState>) -> Result<Json<HealthResponse>, ApiError> {
    let engine = &state.engine;
    let breaker = engine.circuit_breaker_status()?;
    let totals = engine.totals()?;
    Ok(Json(HealthResponse {
        status: if breaker.tripped { "degraded" } else { "ok" },
        version: UPTIME_NODE_VERSION,
        uptime_seconds: state.uptime_seconds(),
        now: engine.now(),
        circuit_breaker: breaker,
        total_distributed: totals.total_distributed,
        total_claims: totals.total_claims,
        custody_available: engine.custody_available(),
    }))
}

async fn handle_metrics(State(state): State<SharedState>) -> Response {
    let Some(handle) = state.metrics.as_ref() else {
        return (StatusCode::NOT_FOUND, "metrics exporter disabled").into_response();
    };

    let mut response = Response::new(Body::from(handle.render()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

async fn handle_get_params(State(state): State<SharedState>) -> Json<RewardParams> {
    Json(state.engine.params())
}

async fn handle_events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<Value>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    let events = state.engine.events().recent(limit);
    Json(events.iter().map(event_json).collect())
}

async fn handle_submit_online(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<SubmitOnlineRequest>,
) -> Result<Json<SubmissionReceipt>, ApiError> {
    let submitter = caller(&headers)?;
    let peers: Vec<_> = request.peers.iter().map(|peer| peer.0).collect();
    let timestamp = request.timestamp.unwrap_or_else(|| state.engine.now());
    let receipt = run_blocking(&state, move |engine| {
        engine.submit_online_status(&submitter, request.pool, &peers, timestamp)
    })
    .await?;
    Ok(Json(receipt))
}

async fn handle_online_peers(
    State(state): State<SharedState>,
    AxumPath((pool, period)): AxumPath<(PoolId, PeriodIndex)>,
) -> Result<Json<OnlinePeersResponse>, ApiError> {
    let peers = state.engine.online_peers(pool, period)?;
    Ok(Json(OnlinePeersResponse {
        pool,
        period,
        peers: peers.into_iter().map(HexId).collect(),
    }))
}

async fn handle_eligible(
    State(state): State<SharedState>,
    Query(query): Query<ParticipantQuery>,
) -> Result<Json<EligibleResponse>, ApiError> {
    let eligible = state
        .engine
        .calculate_eligible(&query.account.0, &query.peer.0, query.pool)?;
    Ok(Json(EligibleResponse {
        account: query.account,
        peer: query.peer,
        pool: query.pool,
        eligible,
    }))
}

async fn handle_claim_status(
    State(state): State<SharedState>,
    Query(query): Query<ParticipantQuery>,
) -> Result<Json<ClaimStatus>, ApiError> {
    let status = state
        .engine
        .claim_status(&query.account.0, &query.peer.0, query.pool)?;
    Ok(Json(status))
}

async fn handle_claim(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimReceipt>, ApiError> {
    let account = caller(&headers)?;
    let receipt = run_blocking(&state, move |engine| {
        engine.claim(&account, &request.peer.0, request.pool, request.max_periods)
    })
    .await?;
    Ok(Json(receipt))
}

async fn handle_update_params(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(update): Json<ParamsUpdate>,
) -> Result<Json<RewardParams>, ApiError> {
    let admin = caller(&headers)?;
    Ok(Json(state.engine.update_params(&admin, update)?))
}

async fn handle_breaker_status(
    State(state): State<SharedState>,
) -> Result<Json<BreakerStatus>, ApiError> {
    Ok(Json(state.engine.circuit_breaker_status()?))
}

async fn handle_trip_breaker(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<BreakerStatus>, ApiError> {
    let operator = caller(&headers)?;
    Ok(Json(state.engine.trip_circuit_breaker(&operator)?))
}

async fn handle_reset_breaker(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<BreakerStatus>, ApiError> {
    let operator = caller(&headers)?;
    Ok(Json(state.engine.reset_circuit_breaker(&operator)?))
}

async fn handle_migration_status(
    State(state): State<SharedState>,
) -> Result<Json<MigrationStatus>, ApiError> {
    Ok(Json(state.engine.migration_status()?))
}

async fn handle_migrate(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<MigrationReport>, ApiError> {
    let admin = caller(&headers)?;
    let report = run_blocking(&state, move |engine| {
        engine.migrate_legacy(&admin, request.max_participants)
    })
    .await?;
    Ok(Json(report))
}

async fn handle_emergency_withdraw(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<WithdrawRequest>,
) -> Result<Json<Value>, ApiError> {
    let admin = caller(&headers)?;
    state
        .engine
        .emergency_withdraw(&admin, request.pool, &request.to.0, request.amount)?;
    Ok(Json(json!({
        "pool": request.pool,
        "to": request.to,
        "amount": request.amount,
        "custody_available": state.engine.custody_available(),
    })))
}

fn event_json(event: &RewardEvent) -> Value {
    match event {
        RewardEvent::OnlineStatusSubmitted {
            pool,
            submitter,
            period,
            submitted,
            newly_online,
        } => json!({
            "type": "online_status_submitted",
            "pool": pool,
            "submitter": encode_id(submitter),
            "period": period,
            "submitted": submitted,
            "newly_online": newly_online,
        }),
        RewardEvent::RewardClaimed {
            account,
            peer,
            pool,
            amount,
            periods_paid,
            cursor,
        } => json!({
            "type": "reward_claimed",
            "account": encode_id(account),
            "peer": encode_id(peer),
            "pool": pool,
            "amount": amount,
            "periods_paid": periods_paid,
            "cursor": cursor,
        }),
        RewardEvent::CircuitBreakerTripped { by, height } => json!({
            "type": "circuit_breaker_tripped",
            "by": encode_id(by),
            "height": height,
        }),
        RewardEvent::CircuitBreakerReset { by, height } => json!({
            "type": "circuit_breaker_reset",
            "by": by.as_ref().map(encode_id),
            "height": height,
        }),
        RewardEvent::ParamsUpdated { by, fields } => json!({
            "type": "params_updated",
            "by": encode_id(by),
            "fields": fields,
        }),
        RewardEvent::LegacyImported {
            pool,
            peer,
            timestamps,
        } => json!({
            "type": "legacy_imported",
            "pool": pool,
            "peer": encode_id(peer),
            "timestamps": timestamps,
        }),
        RewardEvent::MigrationProgress {
            migrated,
            completed,
        } => json!({
            "type": "migration_progress",
            "migrated": migrated,
            "completed": completed,
        }),
        RewardEvent::EmergencyWithdrawal {
            by,
            pool,
            to,
            amount,
        } => json!({
            "type": "emergency_withdrawal",
            "by": encode_id(by),
            "pool": pool,
            "to": encode_id(to),
            "amount": amount,
        }),
    }
}
