//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hook_models::{
    ApproveRequest, BlockedResponse, DeployRequest, ErrorResponse, HealthResponse,
    VersionResponse,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::orchestrator::StartOutcome;
use crate::errors::DeployError;
use crate::models::deployment::{CommitMeta, TriggerKind};
use crate::server::state::ServerState;
use crate::utils::version_info;

const SIGNATURE_HEADERS: [&str; 2] = ["x-signature-256", "x-hub-signature-256"];
const EVENT_HEADERS: [&str; 2] = ["x-github-event", "x-event-kind"];

/// Handler failure mapped onto an HTTP status
pub enum ApiFailure {
    Deploy(DeployError),
    BadRequest(String),
}

impl From<DeployError> for ApiFailure {
    fn from(err: DeployError) -> Self {
        Self::Deploy(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let err = match self {
            ApiFailure::BadRequest(message) => {
                return error_response(StatusCode::BAD_REQUEST, message)
            }
            ApiFailure::Deploy(err) => err,
        };
        let status = match &err {
            DeployError::NotFound(_) => StatusCode::NOT_FOUND,
            DeployError::InvalidTransition(_) | DeployError::LockHeld(_) => StatusCode::CONFLICT,
            DeployError::SignatureError(_) => StatusCode::UNAUTHORIZED,
            DeployError::DeployFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DeployError::ApiError { .. }
            | DeployError::HttpError(_)
            | DeployError::ProtocolError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", err);
        }
        error_response(status, err.to_string())
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            message: message.into(),
        }),
    )
        .into_response()
}

fn first_header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
}

/// Bearer-token guard for admin routes
pub async fn require_admin(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.admin_token else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match provided {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.expose_secret().as_bytes())) => {
            next.run(request).await
        }
        _ => error_response(StatusCode::UNAUTHORIZED, "Missing or invalid token"),
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployd".to_string(),
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

/// Webhook handler; the raw body is needed for signature verification
pub async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let reply = state
        .ingestor
        .handle(
            first_header(&headers, &EVENT_HEADERS),
            first_header(&headers, &SIGNATURE_HEADERS),
            &body,
        )
        .await;
    (reply.status, Json(reply.body))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Recent deployments, newest first
pub async fn deployments_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiFailure> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let deployments = state.orchestrator.repo().list_deployments(limit).await?;
    Ok(Json(deployments))
}

/// Deployment details
pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiFailure> {
    Ok(Json(state.orchestrator.load(id).await?))
}

fn start_response(outcome: StartOutcome) -> Response {
    match outcome {
        StartOutcome::Started(deployment) => {
            (StatusCode::ACCEPTED, Json(deployment)).into_response()
        }
        StartOutcome::Blocked {
            deployment_id,
            status,
        } => blocked_response(deployment_id, status),
        StartOutcome::Failed(deployment) => (StatusCode::BAD_GATEWAY, Json(deployment)).into_response(),
    }
}

fn blocked_response(deployment_id: u64, status: DeploymentStatus) -> Response {
    (
        StatusCode::CONFLICT,
        Json(BlockedResponse {
            success: false,
            error: "deployment_in_progress".to_string(),
            message: format!(
                "Deployment #{} is {}; cancel it before starting another",
                deployment_id, status
            ),
            blocking_deployment_id: deployment_id,
            blocking_status: status.as_str().to_string(),
        }),
    )
        .into_response()
}

fn parse_body<T: Default + serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiFailure> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiFailure::BadRequest(format!("Invalid request: {}", e)))
}

/// Manual deployment of a commit, or of the branch head
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<Response, ApiFailure> {
    let request: DeployRequest = parse_body(&body)?;
    let actor = request.actor.unwrap_or(0);
    let orchestrator = &state.orchestrator;

    let (commit_hash, commit): (String, Option<CommitMeta>) = match request.commit_hash.filter(|c| !c.trim().is_empty()) {
        Some(commit_hash) => (commit_hash, None),
        None => {
            let head = orchestrator.resolve_branch_head().await?;
            (head.sha.clone(), Some(head.into()))
        }
    };

    let outcome = orchestrator
        .start_deployment(&commit_hash, TriggerKind::Manual, actor, commit)
        .await?;
    Ok(start_response(outcome))
}

/// Cancel a pending or building deployment
pub async fn cancel_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiFailure> {
    Ok(Json(state.orchestrator.cancel_deployment(id).await?))
}

/// Approve a pending deployment
pub async fn approve_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Result<Response, ApiFailure> {
    let request: ApproveRequest = parse_body(&body)?;
    let outcome = state
        .orchestrator
        .approve_pending_deployment(id, request.actor.unwrap_or(0))
        .await?;
    Ok(start_response(outcome))
}

/// Restore the backup taken before a deployment
pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiFailure> {
    Ok(Json(state.orchestrator.rollback_deployment(id).await?))
}

/// Drift between a deployment's manifest and the live directory
pub async fn changes_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiFailure> {
    Ok(Json(state.drift.check(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub path: String,
}

/// Unified diff of one drifted file
pub async fn file_diff_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<u64>,
    Query(query): Query<DiffQuery>,
) -> Result<impl IntoResponse, ApiFailure> {
    Ok(Json(state.drift.file_diff(id, &query.path).await?))
}

/// Workflows of the configured repository
pub async fn workflows_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiFailure> {
    let ci = state.orchestrator.ci();
    Ok(Json(ci.list_workflows(ci.owner(), ci.repo()).await?))
}

/// Branches of the configured repository
pub async fn branches_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiFailure> {
    Ok(Json(state.orchestrator.ci().list_branches().await?))
}

/// Repositories visible to the CI credential
pub async fn repositories_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiFailure> {
    Ok(Json(state.orchestrator.ci().list_repositories().await?))
}
