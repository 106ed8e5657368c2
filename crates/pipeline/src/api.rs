//! HTTP API for health checks, Prometheus metrics and incident operations

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pipeline_lib::{
    health::{ComponentStatus, HealthRegistry},
    models::{CorrelationResult, Incident, IncidentId, IncidentStatus, RemediationPlan},
    orchestrator::Orchestrator,
    store::{IncidentQuery, IncidentStore},
    PipelineError,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            health_registry,
            orchestrator,
        }
    }
}

/// Pipeline errors mapped onto HTTP statuses
struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::StaleState { .. } | PipelineError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct ListParams {
    status: Option<IncidentStatus>,
    limit: Option<usize>,
}

async fn list_incidents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<Incident>> {
    let mut query = match params.status {
        Some(status) => IncidentQuery::with_statuses([status]),
        None => IncidentQuery::all(),
    };
    if let Some(limit) = params.limit {
        query = query.limit(limit);
    }

    let incidents = state.orchestrator.store().list(&query).await?;
    Ok(Json(incidents))
}

#[derive(Debug, Serialize)]
struct IncidentDetail {
    incident: Incident,
    correlation: Option<CorrelationResult>,
    plan: Option<RemediationPlan>,
}

async fn get_incident(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<IncidentDetail> {
    let id = IncidentId::new(id);
    let store = state.orchestrator.store();

    Ok(Json(IncidentDetail {
        incident: store.get(&id).await?,
        correlation: store.current_correlation(&id).await?,
        plan: store.current_plan(&id).await?,
    }))
}

/// Claims execution inside the request and continues in the background,
/// so a client disconnect cannot cancel a running stage
async fn approve_incident(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = IncidentId::new(id);
    let incident = state.orchestrator.approve(&id).await?;
    state.orchestrator.spawn_resume(id);
    Ok((StatusCode::ACCEPTED, Json(incident)))
}

#[derive(Debug, Deserialize)]
struct RejectBody {
    reason: String,
}

async fn reject_incident(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> ApiResult<Incident> {
    let id = IncidentId::new(id);
    info!(incident_id = %id, reason = %body.reason, "Plan rejected by operator");
    Ok(Json(state.orchestrator.reject(&id, &body.reason).await?))
}

async fn reanalyze_incident(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = IncidentId::new(id);
    let incident = state.orchestrator.request_reanalysis(&id).await?;
    state.orchestrator.spawn_resume(id);
    Ok((StatusCode::ACCEPTED, Json(incident)))
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.stats().await)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
        .route("/incidents", get(list_incidents))
        .route("/incidents/:id", get(get_incident))
        .route("/incidents/:id/approve", post(approve_incident))
        .route("/incidents/:id/reject", post(reject_incident))
        .route("/incidents/:id/reanalyze", post(reanalyze_incident))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
