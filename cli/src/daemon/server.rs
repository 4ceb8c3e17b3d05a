// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use qnms_core::{
    application::{
        command_queue::QueueStats,
        metrics::{HubMetrics, SystemMetrics},
        repair_pipeline::IngestOutcome,
    },
    domain::{
        agent::{AgentCapabilities, AgentId, SwarmAgentState},
        coordinate::{CorrelationId, Position, SensorReading},
        defect::{DefectId, DefectRecord},
        errors::HubError,
        hub_config::{HubConfig, SafetyConfig},
        safety::SafetyConstraints,
    },
    infrastructure::{
        event_bus::EventBus,
        planner::{HttpPathPlanner, PlannerSession},
        twin::{ConnectionManager, WebSocketConnector},
    },
};
use qnms_swarm::TickReport;

use crate::hub::{HealthReport, Hub, Withdrawal};

pub async fn start_daemon(config: HubConfig) -> Result<()> {
    config
        .validate()
        .context("Configuration validation failed")?;

    info!(
        name = %config.metadata.name,
        twin = %config.spec.twin.url,
        planner = %config.spec.planner.endpoint,
        "QNMS hub starting (PID: {})",
        std::process::id()
    );

    let observability = &config.spec.observability;
    if observability.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], observability.metrics.port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics on port {}", observability.metrics.port);
    }

    let event_bus = EventBus::with_default_capacity();
    let metrics = Arc::new(HubMetrics::new());

    let planner_client = HttpPathPlanner::new(
        &config.spec.planner.endpoint,
        Duration::from_millis(config.spec.planner.timeout_ms),
    )
    .context("Failed to create planner client")?;
    let planner = Arc::new(PlannerSession::from_config(
        Arc::new(planner_client),
        &config.spec.planner,
    ));

    let connector = Arc::new(WebSocketConnector::new(config.spec.twin.url.clone()));
    let (manager, twin, twin_events) = ConnectionManager::new(&config.spec.twin, connector);
    let manager = manager
        .with_event_bus(event_bus.clone())
        .with_metrics(metrics.clone());

    let network = config.spec.network.clone();
    let hub = Arc::new(
        Hub::new(config, planner, Arc::new(twin.clone()), event_bus, metrics).with_twin(twin),
    );

    let cancel = CancellationToken::new();
    let mut tasks = hub.clone().spawn(twin_events, cancel.clone());
    tasks.push(tokio::spawn(manager.run(cancel.clone())));

    let addr = format!("{}:{}", network.bind_address, network.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Hub listening on {}", addr);

    axum::serve(listener, router(hub))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Hub shutting down");
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/sensor-data", post(sensor_data_handler))
        .route("/api/v1/dispatch", post(dispatch_handler))
        .route(
            "/api/v1/agents",
            get(list_agents_handler).post(register_agent_handler),
        )
        .route("/api/v1/agents/{agent_id}", get(get_agent_handler))
        .route("/api/v1/defects", get(list_defects_handler))
        .route("/api/v1/defects/{defect_id}", get(get_defect_handler))
        .route(
            "/api/v1/defects/{defect_id}/cancel",
            post(cancel_defect_handler),
        )
        .route("/api/v1/queue/stats", get(queue_stats_handler))
        .route("/api/v1/metrics", get(metrics_handler))
        .route(
            "/api/v1/safety/constraints",
            get(get_constraints_handler).put(update_constraints_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

// ── Wire types ─────────────────────────────────────────────────────────────

/// Body of `POST /api/v1/sensor-data`: one coordinate or a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorDataRequest {
    Batch {
        coordinates: Vec<SensorReading>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<CorrelationId>,
    },
    Single(SensorReading),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: usize,
    pub results: Vec<IngestOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentRequest {
    pub agent_id: AgentId,
    pub position: Position,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintsUpdate {
    pub cancelled: Vec<Withdrawal>,
}

/// A [`HubError`] rendered in the caller-facing error shape.
pub struct ApiError(HubError);

impl From<HubError> for ApiError {
    fn from(error: HubError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        HubError::BadRequest(rejection.body_text()).into()
    }
}

pub fn status_for(error: &HubError) -> StatusCode {
    match error {
        HubError::NotFound { .. } => StatusCode::NOT_FOUND,
        HubError::Validation { .. } | HubError::BadRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        HubError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
        HubError::Planning(_) => StatusCode::BAD_GATEWAY,
        HubError::Execution(_) => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        (status, Json(self.0.to_response(None))).into_response()
    }
}

fn parse_defect_id(raw: &str) -> Result<DefectId, HubError> {
    Uuid::parse_str(raw)
        .map(DefectId)
        .map_err(|_| HubError::not_found("defect", raw))
}

// ── Handlers ───────────────────────────────────────────────────────────────

async fn health_handler(State(hub): State<Arc<Hub>>) -> Json<HealthReport> {
    Json(hub.health())
}

async fn sensor_data_handler(
    State(hub): State<Arc<Hub>>,
    body: Result<Json<SensorDataRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let Json(request) = body?;

    let (results, single) = match request {
        SensorDataRequest::Single(reading) => (hub.ingest(vec![reading], None), true),
        SensorDataRequest::Batch {
            coordinates,
            correlation_id,
        } => {
            if coordinates.is_empty() {
                return Err(HubError::BadRequest("coordinates cannot be empty".to_string()).into());
            }
            (hub.ingest(coordinates, correlation_id.as_ref()), false)
        }
    };

    // a lone rejected coordinate is an error; batches report per item
    if single {
        if let Some(IngestOutcome::Rejected {
            correlation_id,
            violations,
        }) = results.first()
        {
            return Err(HubError::Validation {
                violations: violations.clone(),
                correlation_id: Some(correlation_id.clone()),
            }
            .into());
        }
    }

    let accepted = results.iter().filter(|r| r.is_accepted()).count();
    let response = IngestResponse {
        accepted,
        rejected: results.len() - accepted,
        results,
    };
    let status = if single {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

async fn dispatch_handler(State(hub): State<Arc<Hub>>) -> Json<TickReport> {
    Json(hub.dispatch())
}

async fn list_agents_handler(State(hub): State<Arc<Hub>>) -> Json<Vec<SwarmAgentState>> {
    Json(hub.agents())
}

async fn register_agent_handler(
    State(hub): State<Arc<Hub>>,
    body: Result<Json<RegisterAgentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SwarmAgentState>), ApiError> {
    let Json(request) = body?;
    let state = hub.register_agent(request.agent_id, request.position, request.capabilities)?;
    Ok((StatusCode::CREATED, Json(state)))
}

async fn get_agent_handler(
    State(hub): State<Arc<Hub>>,
    Path(agent_id): Path<String>,
) -> Result<Json<SwarmAgentState>, ApiError> {
    Ok(Json(hub.agent(&AgentId::new(agent_id))?))
}

async fn list_defects_handler(State(hub): State<Arc<Hub>>) -> Json<Vec<DefectRecord>> {
    Json(hub.defects())
}

async fn get_defect_handler(
    State(hub): State<Arc<Hub>>,
    Path(defect_id): Path<String>,
) -> Result<Json<DefectRecord>, ApiError> {
    let defect_id = parse_defect_id(&defect_id)?;
    Ok(Json(hub.defect(defect_id)?))
}

async fn cancel_defect_handler(
    State(hub): State<Arc<Hub>>,
    Path(defect_id): Path<String>,
    body: Bytes,
) -> Result<Json<Withdrawal>, ApiError> {
    let defect_id = parse_defect_id(&defect_id)?;
    let request: CancelRequest = if body.is_empty() {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| HubError::BadRequest(e.to_string()))?
    };
    let reason = request
        .reason
        .unwrap_or_else(|| "cancelled by operator".to_string());
    Ok(Json(hub.cancel_defect(defect_id, &reason)?))
}

async fn queue_stats_handler(State(hub): State<Arc<Hub>>) -> Json<QueueStats> {
    Json(hub.queue_stats())
}

async fn metrics_handler(State(hub): State<Arc<Hub>>) -> Json<SystemMetrics> {
    Json(hub.metrics())
}

async fn get_constraints_handler(State(hub): State<Arc<Hub>>) -> Json<SafetyConstraints> {
    Json(hub.constraints())
}

async fn update_constraints_handler(
    State(hub): State<Arc<Hub>>,
    body: Result<Json<SafetyConfig>, JsonRejection>,
) -> Result<Json<ConstraintsUpdate>, ApiError> {
    let Json(safety) = body?;
    let cancelled = hub.update_constraints(&safety)?;
    Ok(Json(ConstraintsUpdate { cancelled }))
}
