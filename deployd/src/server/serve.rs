//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::DeployError;
use crate::server::handlers::{
    approve_handler, branches_handler, cancel_handler, changes_handler, create_deployment_handler,
    deployment_handler, deployments_handler, file_diff_handler, health_handler, repositories_handler,
    require_admin, rollback_handler, version_handler, webhook_handler, workflows_handler,
};
use crate::server::state::ServerState;

/// Build the router
pub fn router(state: Arc<ServerState>) -> Router {
    let admin = Router::new()
        // Deployments
        .route(
            "/deployments",
            get(deployments_handler).post(create_deployment_handler),
        )
        .route("/deployments/{id}", get(deployment_handler))
        .route("/deployments/{id}/cancel", post(cancel_handler))
        .route("/deployments/{id}/approve", post(approve_handler))
        .route("/deployments/{id}/rollback", post(rollback_handler))
        // Drift
        .route("/deployments/{id}/changes", get(changes_handler))
        .route("/deployments/{id}/changes/diff", get(file_diff_handler))
        // CI metadata
        .route("/ci/workflows", get(workflows_handler))
        .route("/ci/branches", get(branches_handler))
        .route("/ci/repositories", get(repositories_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Inbound events
        .route("/webhook", post(webhook_handler))
        .merge(admin)
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployError>>, DeployError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeployError::ServerError(e.to_string()))
    });

    Ok(handle)
}
