//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use ingest_api::{
    ErrorResponse, HealthResponse, IngestOutcome, IngestResponse, PhaseStatus, RelayedEvent,
    StatusResponse, VersionResponse,
};
use tracing::{error, info, warn};

use crate::errors::{OrchestratorError, StoreError};
use crate::models::event::DeploymentEvent;
use crate::models::request::{BuildId, WorkflowRequest};
use crate::orchestrator::Orchestrator;
use crate::server::state::ServerState;
use crate::status::Phase;
use crate::store::event_log::AppendOutcome;
use crate::utils::version_info;

pub const SERVICE_NAME: &str = "shipwright";

fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
        .into_response()
}

fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "unauthorized", "invalid credentials")
}

fn store_failure(e: StoreError) -> Response {
    error!("Store failure: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Relayed provider notification handler.
///
/// Acknowledges with 2xx once the event is recorded, recognised as a
/// duplicate or discarded as a regression.
pub async fn ingest_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.credentials.verify(&headers) {
        warn!("Rejected build event with invalid credentials");
        return unauthorized();
    }

    let relayed: RelayedEvent = match serde_json::from_slice(&body) {
        Ok(relayed) => relayed,
        Err(e) => {
            warn!("Malformed build event: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "malformed_event", e.to_string());
        }
    };

    if relayed.build.get("status").and_then(|s| s.as_str()).is_none() {
        warn!("Build event {} has no status", relayed.context.event_id);
        return error_response(
            StatusCode::BAD_REQUEST,
            "malformed_event",
            "build.status is required",
        );
    }
    let observed = match state.orchestrator.driver().parse_notification(&relayed.build) {
        Ok(observed) => observed,
        Err(e) => {
            warn!("Unreadable build event {}: {}", relayed.context.event_id, e);
            return error_response(StatusCode::BAD_REQUEST, "malformed_event", e.to_string());
        }
    };

    let external_id = observed.external_id.clone();
    match state.orchestrator.ingest(observed).await {
        Ok(Some(ingested)) => {
            let outcome = match ingested.outcome {
                AppendOutcome::Applied => IngestOutcome::Applied,
                AppendOutcome::Duplicate => IngestOutcome::Duplicate,
                AppendOutcome::Regressed { .. } => IngestOutcome::Discarded,
            };
            (
                StatusCode::OK,
                Json(IngestResponse {
                    outcome,
                    build_id: Some(ingested.build_id.to_string()),
                    status: Some(ingested.status.to_string()),
                }),
            )
                .into_response()
        }
        Ok(None) => {
            info!("Ignoring event for unknown provider build {}", external_id);
            (
                StatusCode::ACCEPTED,
                Json(IngestResponse {
                    outcome: IngestOutcome::Ignored,
                    build_id: None,
                    status: None,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to ingest event for {}: {}", external_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "ingest_failed", e.to_string())
        }
    }
}

fn phase_status(event: Option<&DeploymentEvent>) -> Option<PhaseStatus> {
    event.map(|e| PhaseStatus {
        status: e.status.to_string(),
        external_id: e.external_id.clone(),
        message: e.message.clone(),
        recorded_at: e.recorded_at,
    })
}

async fn status_of(
    orchestrator: &Orchestrator,
    build_id: &BuildId,
) -> Result<Option<StatusResponse>, StoreError> {
    let Some(checkpoint) = orchestrator.checkpoint(build_id).await? else {
        return Ok(None);
    };
    let events = orchestrator.events(build_id).await?;
    let latest = |phase: Phase| events.iter().rev().find(|e| e.phase == phase);

    Ok(Some(StatusResponse {
        build_id: build_id.to_string(),
        deployment_id: checkpoint
            .request
            .deployment()
            .map(|d| d.deployment_id().to_string()),
        stage: checkpoint.stage.as_str().to_string(),
        build: phase_status(latest(Phase::Build)),
        deploy: phase_status(latest(Phase::Deploy)),
    }))
}

/// Current status of a build and its deploy
pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Path(build_id): Path<String>,
) -> Response {
    let build_id = BuildId::from(build_id);
    match status_of(&state.orchestrator, &build_id).await {
        Ok(Some(status)) => Json(status).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("unknown build {}", build_id),
        ),
        Err(e) => store_failure(e),
    }
}

/// Full event history of a build
pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Path(build_id): Path<String>,
) -> Response {
    let build_id = BuildId::from(build_id);
    match state.orchestrator.events(&build_id).await {
        Ok(events) if events.is_empty() => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no events for build {}", build_id),
        ),
        Ok(events) => Json(events).into_response(),
        Err(e) => store_failure(e),
    }
}

/// Start a build (and optional deploy) workflow.
///
/// Responds once the provider accepted the build; the rest of the workflow
/// continues in the background.
pub async fn trigger_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.credentials.verify(&headers) {
        warn!("Rejected workflow request with invalid credentials");
        return unauthorized();
    }

    let request: WorkflowRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "malformed_request", e.to_string())
        }
    };
    let build_id = request.build_id().clone();

    if let Err(e) = state.orchestrator.start(request.clone()).await {
        let status = match &e {
            OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::DeployUnsupported { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::RequestMismatch { .. } => StatusCode::CONFLICT,
            OrchestratorError::Submit(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("Cannot start workflow for build {}: {}", build_id, e);
        return error_response(status, "workflow_rejected", e.to_string());
    }

    let orchestrator = state.orchestrator.clone();
    let workflow_build_id = build_id.clone();
    tokio::spawn(async move {
        match orchestrator.run(request).await {
            Ok(outcome) => info!(
                "Workflow for build {} ended: {:?}",
                workflow_build_id, outcome
            ),
            Err(e) => error!("Workflow for build {} stopped: {}", workflow_build_id, e),
        }
    });

    match status_of(&state.orchestrator, &build_id).await {
        Ok(Some(status)) => (StatusCode::ACCEPTED, Json(status)).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e) => store_failure(e),
    }
}
