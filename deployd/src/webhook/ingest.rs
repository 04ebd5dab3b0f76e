//! Webhook ingestion
//!
//! Authenticates deliveries from the source host and the CI service and
//! routes them into the orchestrator. Signature failures never get past
//! `handle`.

use std::sync::Arc;

use http::StatusCode;
use hook_models::{PushEvent, WebhookResponse, WorkflowRunEvent, WorkflowRunPayload};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::orchestrator::{BuildCheck, Orchestrator, StartOutcome};
use crate::errors::DeployError;
use crate::models::deployment::{CommitMeta, Deployment, TriggerKind};
use crate::storage::settings::Settings;
use crate::utils::short_sha;
use crate::webhook::signature::verify_signature;

/// Webhook ingestion settings
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: Option<SecretString>,
    pub allow_unsigned: bool,
    pub auto_deploy: bool,
    pub manual_approval: bool,
    pub branch: String,
}

impl WebhookConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            secret: settings
                .webhook
                .secret
                .clone()
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            allow_unsigned: settings.webhook.allow_unsigned,
            auto_deploy: settings.deploy.auto_deploy,
            manual_approval: settings.deploy.manual_approval,
            branch: settings.github.branch.clone(),
        }
    }
}

/// HTTP status plus JSON envelope for one delivery
#[derive(Debug, Clone)]
pub struct WebhookReply {
    pub status: StatusCode,
    pub body: WebhookResponse,
}

impl WebhookReply {
    fn ok(body: WebhookResponse) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    fn ignored(message: impl Into<String>) -> Self {
        Self::ok(WebhookResponse::ok(message))
    }

    fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: WebhookResponse::error(message),
        }
    }
}

fn status_label(deployment: &Deployment) -> &'static str {
    deployment.status.as_str()
}

/// Verifies and routes inbound webhook events
pub struct WebhookIngestor {
    orchestrator: Arc<Orchestrator>,
    config: WebhookConfig,
}

impl WebhookIngestor {
    pub fn new(orchestrator: Arc<Orchestrator>, config: WebhookConfig) -> Self {
        if config.secret.is_none() {
            if config.allow_unsigned {
                warn!("No webhook secret configured, unsigned deliveries will be accepted");
            } else {
                warn!("No webhook secret configured, all deliveries will be rejected");
            }
        }
        Self {
            orchestrator,
            config,
        }
    }

    /// Handle one delivery
    pub async fn handle(
        &self,
        event_kind: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> WebhookReply {
        if let Err(e) = self.authenticate(signature, body) {
            warn!("Rejected webhook delivery: {}", e);
            return WebhookReply::rejected(StatusCode::UNAUTHORIZED, "Invalid signature");
        }

        let Some(kind) = event_kind.map(str::trim).filter(|k| !k.is_empty()) else {
            return WebhookReply::rejected(StatusCode::BAD_REQUEST, "Missing event type");
        };
        debug!("Webhook event: {}", kind);

        let result = match kind {
            "ping" => Ok(WebhookReply::ok(WebhookResponse::ok("pong"))),
            "push" => match parse::<PushEvent>(body) {
                Ok(event) => self.on_push(event).await,
                Err(reply) => return reply,
            },
            "workflow_run" => match parse::<WorkflowRunEvent>(body) {
                Ok(event) => self.on_workflow_run(event).await,
                Err(reply) => return reply,
            },
            other => {
                return WebhookReply::rejected(
                    StatusCode::BAD_REQUEST,
                    format!("Unsupported event: {}", other),
                )
            }
        };

        result.unwrap_or_else(|e| {
            error!("Webhook {} processing failed: {}", kind, e);
            WebhookReply::rejected(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
    }

    fn authenticate(&self, signature: Option<&str>, body: &[u8]) -> Result<(), DeployError> {
        match &self.config.secret {
            Some(secret) => verify_signature(secret.expose_secret().as_bytes(), body, signature),
            None if self.config.allow_unsigned => {
                warn!("Accepting unverified webhook delivery, no secret configured");
                Ok(())
            }
            None => Err(DeployError::SignatureError(
                "no webhook secret configured".to_string(),
            )),
        }
    }

    async fn on_push(&self, event: PushEvent) -> Result<WebhookReply, DeployError> {
        if !self.config.auto_deploy {
            return Ok(WebhookReply::ignored("Auto-deploy disabled, push ignored"));
        }
        if event.branch() != Some(self.config.branch.as_str()) {
            return Ok(WebhookReply::ignored(format!(
                "Push to {} ignored, tracking {}",
                event.git_ref, self.config.branch
            )));
        }

        let sha = event
            .head_commit
            .as_ref()
            .map(|c| c.id.clone())
            .or(event.after.clone())
            .filter(|sha| !sha.is_empty() && sha.chars().any(|c| c != '0'));
        let Some(sha) = sha else {
            return Ok(WebhookReply::ignored("Push without a head commit ignored"));
        };

        let commit = event.head_commit.as_ref().map(|c| CommitMeta {
            message: c.message.clone(),
            author: c.author.as_ref().map(|a| a.name.clone()).unwrap_or_default(),
            date: c.timestamp,
        });

        if self.config.manual_approval {
            let deployment = self
                .orchestrator
                .queue_deployment(&sha, TriggerKind::Webhook, 0, commit)
                .await?;
            info!(
                "Push {} queued as deployment #{} awaiting approval",
                short_sha(&sha),
                deployment.id
            );
            return Ok(WebhookReply::ok(
                WebhookResponse::ok("Deployment awaiting approval")
                    .with_deployment(deployment.id, status_label(&deployment)),
            ));
        }

        let outcome = self
            .orchestrator
            .start_deployment(&sha, TriggerKind::Webhook, 0, commit)
            .await?;
        Ok(WebhookReply::ok(match outcome {
            StartOutcome::Started(deployment) => WebhookResponse::ok("Deployment started")
                .with_deployment(deployment.id, status_label(&deployment)),
            StartOutcome::Blocked {
                deployment_id,
                status,
            } => WebhookResponse::error(format!(
                "Deployment #{} is {}, push not deployed",
                deployment_id, status
            ))
            .with_deployment(deployment_id, status.as_str()),
            StartOutcome::Failed(deployment) => WebhookResponse::error(
                deployment
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Failed to trigger build".to_string()),
            )
            .with_deployment(deployment.id, status_label(&deployment)),
        }))
    }

    async fn on_workflow_run(&self, event: WorkflowRunEvent) -> Result<WebhookReply, DeployError> {
        if event.action != "completed" {
            return Ok(WebhookReply::ignored(format!(
                "Workflow run {} ignored",
                event.action
            )));
        }
        let run = event.workflow_run;

        let workflow = &self.orchestrator.config().workflow;
        if !from_workflow(&run, workflow) {
            debug!(
                "Run {} of {:?} is not from workflow {}",
                run.id, run.path, workflow
            );
            return Ok(WebhookReply::ignored(format!(
                "Run {} is not from workflow {}",
                run.id, workflow
            )));
        }

        let repo = self.orchestrator.repo();
        let deployment = match repo.get_deployment_by_run_id(run.id).await? {
            Some(deployment) => Some(deployment),
            None => {
                // Webhook may arrive before the poller matched the run
                let candidate = repo
                    .list_pending_or_building()
                    .await?
                    .into_iter()
                    .find(|d| {
                        d.status == DeploymentStatus::Building
                            && d.workflow_run_id.is_none()
                            && d.commit_hash.eq_ignore_ascii_case(&run.head_sha)
                    });
                match candidate {
                    Some(d) => Some(
                        self.orchestrator
                            .link_run(&d, run.id, run.html_url.clone())
                            .await?,
                    ),
                    None => None,
                }
            }
        };

        let Some(deployment) = deployment else {
            return Ok(WebhookReply::ignored(format!(
                "No deployment for run {}",
                run.id
            )));
        };
        if deployment.status != DeploymentStatus::Building {
            return Ok(WebhookReply::ok(
                WebhookResponse::ok(format!("Deployment already {}", deployment.status))
                    .with_deployment(deployment.id, status_label(&deployment)),
            ));
        }

        let conclusion = run.conclusion.as_deref().unwrap_or("unknown");
        if conclusion != "success" {
            let deployment = self.orchestrator.fail_build(&deployment, conclusion).await?;
            return Ok(WebhookReply::ok(
                WebhookResponse::ok("Build failure recorded")
                    .with_deployment(deployment.id, status_label(&deployment)),
            ));
        }

        let id = deployment.id;
        let body = match self.orchestrator.process_successful_build(id).await? {
            BuildCheck::Deployed(d) => {
                WebhookResponse::ok("Deployment succeeded").with_deployment(d.id, status_label(&d))
            }
            BuildCheck::Failed(d) | BuildCheck::TimedOut(d) => WebhookResponse::error(
                d.error_message
                    .clone()
                    .unwrap_or_else(|| "Deployment failed".to_string()),
            )
            .with_deployment(d.id, status_label(&d)),
            BuildCheck::LockBusy(holder) => WebhookResponse::ok(format!(
                "Deployment lock held by #{}, will retry on next poll",
                holder.deployment_id
            ))
            .with_deployment(id, DeploymentStatus::Building.as_str()),
            BuildCheck::Skipped(status) => WebhookResponse::ok(format!("Deployment already {}", status))
                .with_deployment(id, status.as_str()),
            BuildCheck::NoRunYet | BuildCheck::Waiting(_) => {
                WebhookResponse::ok("Build still running").with_deployment(id, "building")
            }
        };
        Ok(WebhookReply::ok(body))
    }
}

/// Whether a run belongs to `workflow`, given as file name or numeric id.
/// Payloads that carry neither field cannot be told apart and pass.
fn from_workflow(run: &WorkflowRunPayload, workflow: &str) -> bool {
    if let Ok(id) = workflow.parse::<u64>() {
        return run.workflow_id.is_none_or(|w| w == id);
    }
    match run.path.as_deref() {
        Some(path) => {
            let path = path.split('@').next().unwrap_or(path);
            path.rsplit('/').next() == Some(workflow)
        }
        None => true,
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, WebhookReply> {
    serde_json::from_slice(body).map_err(|e| {
        WebhookReply::rejected(StatusCode::BAD_REQUEST, format!("Malformed payload: {}", e))
    })
}
