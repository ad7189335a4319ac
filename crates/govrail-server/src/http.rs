//! Route table and handlers. Every handler deserializes its input,
//! delegates to [`GovrailRuntime`], and serializes whatever comes back —
//! no governance decisions are made at this layer.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::info;

use govrail_audit::AuditQuery;
use govrail_rbac::{Role, User};
use govrail_runtime::GovrailRuntime;
use govrail_sse::SubscriptionFilter;
use govrail_types::{
    ActivationGateConfig, AttemptId, EventChannel, GovrailError, JobId, Manifest, MissionId,
    PlanId, PlanType, StreamEvent,
};

/// Process-wide handle threaded through every route. Cheaply cloneable —
/// cloning just clones the `Arc`/handle fields inside [`GovrailRuntime`].
#[derive(Clone)]
pub struct AppState {
    pub runtime: GovrailRuntime,
}

impl AppState {
    pub fn new(runtime: GovrailRuntime) -> Self {
        Self { runtime }
    }
}

struct ApiError(GovrailError);

impl From<GovrailError> for ApiError {
    fn from(err: GovrailError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let err = &self.0;
        let status = match err {
            GovrailError::ManifestNotFound { .. }
            | GovrailError::MissingTraceContext { .. }
            | GovrailError::OrphanKilled { .. } => StatusCode::NOT_FOUND,
            GovrailError::ManifestHashMismatch { .. } | GovrailError::ManifestInvalidSchema { .. } => {
                StatusCode::BAD_REQUEST
            }
            GovrailError::ActivationGateBlocked { .. }
            | GovrailError::ReflexLifecycleInvalid { .. }
            | GovrailError::ReflexActionFailed { .. } => StatusCode::CONFLICT,
            GovrailError::BudgetCostExceeded
            | GovrailError::BudgetParallelismExceeded { .. }
            | GovrailError::ExecOverbudget
            | GovrailError::PolicyReflexCooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
            GovrailError::CircuitBreakerOpen { .. } | GovrailError::RetryExhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GovrailError::ExecTimeout
            | GovrailError::UpstreamUnavailable { .. }
            | GovrailError::BadResponseFormat { .. } => StatusCode::BAD_GATEWAY,
            GovrailError::AuditLogFailure { .. } | GovrailError::TelemetryFailure { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({
            "code": err.code(),
            "message": err.to_string(),
            "category": err.category(),
            "retriable": err.retriable(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
struct SubmitMissionRequest {
    title: String,
    goal: String,
    #[serde(default)]
    tags: HashMap<String, String>,
}

async fn submit_mission(
    State(state): State<AppState>,
    Json(req): Json<SubmitMissionRequest>,
) -> impl IntoResponse {
    let mission = state.runtime.submit_mission(&req.title, &req.goal, req.tags).await;
    Json(mission)
}

#[derive(Debug, Deserialize)]
struct NewPlanRequest {
    plan_type: PlanType,
}

async fn new_plan(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
    Json(req): Json<NewPlanRequest>,
) -> ApiResult<govrail_types::Plan> {
    let plan = state.runtime.new_plan(MissionId::from(mission_id), req.plan_type).await?;
    Ok(Json(plan))
}

#[derive(Debug, Deserialize)]
struct NewJobRequest {
    job_type: String,
    #[serde(default)]
    depends_on: HashSet<String>,
    #[serde(default)]
    rollback_possible: bool,
}

async fn new_job(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    Json(req): Json<NewJobRequest>,
) -> ApiResult<govrail_types::Job> {
    let depends_on = req.depends_on.into_iter().map(JobId::from).collect();
    let job = state
        .runtime
        .new_job(PlanId::from(plan_id), &req.job_type, depends_on, req.rollback_possible)
        .await?;
    Ok(Json(job))
}

async fn get_trace(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> ApiResult<govrail_types::TraceChain> {
    let chain = state.runtime.get_trace(&AttemptId::from(attempt_id)).await?;
    Ok(Json(chain))
}

#[derive(Debug, Deserialize)]
struct CreateManifestRequest {
    manifest: Manifest,
    #[serde(default = "default_true")]
    validate_chain: bool,
}

fn default_true() -> bool {
    true
}

async fn create_manifest(
    State(state): State<AppState>,
    Json(req): Json<CreateManifestRequest>,
) -> ApiResult<Manifest> {
    let created = state.runtime.create_manifest(req.manifest, req.validate_chain).await?;
    Ok(Json(created))
}

async fn set_shadow(
    State(state): State<AppState>,
    Path(version): Path<u64>,
) -> ApiResult<Manifest> {
    let manifest = state.runtime.set_shadow(version).await?;
    Ok(Json(manifest))
}

#[derive(Debug, Deserialize)]
struct ActivateManifestRequest {
    #[serde(default)]
    gate_config: Option<ActivationGateConfig>,
    #[serde(default)]
    force: bool,
}

async fn activate_manifest(
    State(state): State<AppState>,
    Path(version): Path<u64>,
    Json(req): Json<ActivateManifestRequest>,
) -> ApiResult<Manifest> {
    let gate_config = req.gate_config.unwrap_or_default();
    let manifest = state
        .runtime
        .activate_manifest(version, &gate_config, req.force)
        .await?;
    Ok(Json(manifest))
}

#[derive(Debug, Deserialize)]
struct AuthorizeRequest {
    user_id: String,
    role: Role,
    required: Vec<String>,
    #[serde(default)]
    require_all: bool,
}

async fn authorize(
    State(state): State<AppState>,
    Json(req): Json<AuthorizeRequest>,
) -> Json<govrail_rbac::Decision> {
    let user = User::new(req.user_id, req.role);
    Json(state.runtime.authorize(&user, &req.required, req.require_all))
}

#[derive(Debug, Deserialize)]
struct AuditQueryParams {
    mission_id: Option<String>,
    plan_id: Option<String>,
    job_id: Option<String>,
    attempt_id: Option<String>,
    #[serde(default)]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

async fn query_audit(
    State(state): State<AppState>,
    Query(params): Query<AuditQueryParams>,
) -> Json<Vec<govrail_types::AuditEvent>> {
    let query = AuditQuery {
        mission_id: params.mission_id,
        plan_id: params.plan_id,
        job_id: params.job_id,
        attempt_id: params.attempt_id,
        limit: params.limit,
        offset: params.offset,
        ..Default::default()
    };
    Json(state.runtime.audit.query(&query))
}

#[derive(Debug, Deserialize)]
struct EventFilterQuery {
    #[serde(default)]
    channels: Option<String>,
    #[serde(default)]
    event_types: Option<String>,
    #[serde(default)]
    entity_ids: Option<String>,
    #[serde(default)]
    replay: usize,
}

fn parse_channel(raw: &str) -> Option<EventChannel> {
    match raw {
        "audit" => Some(EventChannel::Audit),
        "lifecycle" => Some(EventChannel::Lifecycle),
        "metrics" => Some(EventChannel::Metrics),
        "reflex" => Some(EventChannel::Reflex),
        "governor" => Some(EventChannel::Governor),
        "enforcement" => Some(EventChannel::Enforcement),
        "all" => Some(EventChannel::All),
        _ => None,
    }
}

fn comma_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

/// `StreamEvent` -> the axum SSE wire type, keeping the same envelope shape
/// as `StreamEvent::to_sse_format` (channel/event_type/timestamp/data).
fn to_axum_event(event: StreamEvent) -> Result<Event, Infallible> {
    let payload = serde_json::json!({
        "channel": event.channel.as_str(),
        "event_type": event.event_type,
        "timestamp": event.timestamp.to_rfc3339(),
        "data": event.data,
    });
    Ok(Event::default()
        .id(event.event_id)
        .event(event.event_type.clone())
        .data(payload.to_string()))
}

async fn events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilterQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let channels = filter
        .channels
        .as_deref()
        .map(|raw| comma_list(raw).iter().filter_map(|c| parse_channel(c)).collect())
        .unwrap_or_else(|| vec![EventChannel::All]);
    let subscription_filter = SubscriptionFilter {
        channels,
        event_types: filter.event_types.as_deref().map(comma_list),
        entity_ids: filter.entity_ids.as_deref().map(comma_list),
    };

    let subscription = state.runtime.subscribe_stream(subscription_filter, filter.replay);
    let connected = StreamEvent::new(EventChannel::All, "server.connected", HashMap::new());
    let initial = stream::once(async move { to_axum_event(connected) });
    let live = ReceiverStream::new(subscription.receiver).map(|event| to_axum_event(event));

    Sse::new(initial.chain(live)).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(10)))
}

/// Builds the route table once and reuses it under `/api` for legacy
/// clients, matching the unprefixed and `/api`-prefixed route pairing.
fn core_routes() -> Router<AppState> {
    Router::new()
        .route("/missions", post(submit_mission))
        .route("/missions/{mission_id}/plans", post(new_plan))
        .route("/plans/{plan_id}/jobs", post(new_job))
        .route("/trace/{attempt_id}", get(get_trace))
        .route("/manifests", post(create_manifest))
        .route("/manifests/{version}/shadow", post(set_shadow))
        .route("/manifests/{version}/activate", post(activate_manifest))
        .route("/authorize", post(authorize))
        .route("/audit", get(query_audit))
        .route("/events", get(events))
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(core_routes())
        .nest("/api", core_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds `addr` and serves until ctrl-c, per the adapter's scope: no
/// business logic, just the HTTP surface over an already-built runtime.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "govrail-server listening");
    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
