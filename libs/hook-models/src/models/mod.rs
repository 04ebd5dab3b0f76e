//! Webhook and daemon API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ================================ INBOUND EVENTS ================================= //

/// Push event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub after: Option<String>,
    /// Absent when a branch is deleted
    #[serde(default)]
    pub head_commit: Option<PushCommit>,
    #[serde(default)]
    pub pusher: Option<Pusher>,
}

impl PushEvent {
    /// Branch name for `refs/heads/<branch>` refs
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }
}

/// Commit carried by a push event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushCommit {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: Option<PushAuthor>,
}

/// Push commit author
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushAuthor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Account that pushed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pusher {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Workflow run event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunEvent {
    pub action: String,
    pub workflow_run: WorkflowRunPayload,
}

/// Run data carried by a workflow run event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunPayload {
    pub id: u64,
    #[serde(default)]
    pub workflow_id: Option<u64>,
    /// Workflow file, e.g. `.github/workflows/build.yml`
    #[serde(default)]
    pub path: Option<String>,
    pub head_sha: String,
    #[serde(default)]
    pub head_branch: Option<String>,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Ping event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingEvent {
    #[serde(default)]
    pub zen: Option<String>,
    #[serde(default)]
    pub hook_id: Option<u64>,
}

// ================================== RESPONSES ==================================== //

/// Webhook response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl WebhookResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            deployment_id: None,
            status: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            deployment_id: None,
            status: None,
        }
    }

    pub fn with_deployment(mut self, deployment_id: u64, status: impl Into<String>) -> Self {
        self.deployment_id = Some(deployment_id);
        self.status = Some(status.into());
        self
    }
}

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Returned when a deployment cannot start because another one is active
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
    pub blocking_deployment_id: u64,
    pub blocking_status: String,
}

/// Generic error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

/// Manual deployment request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Branch head is used when omitted
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub actor: Option<u64>,
}

/// Approval request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub actor: Option<u64>,
}

/// Drift report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// Unified diff for one modified file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiffResponse {
    pub path: String,
    pub diff: String,
}
