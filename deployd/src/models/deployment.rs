//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;

/// What started a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Webhook,
    Approval,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Webhook => "webhook",
            TriggerKind::Approval => "approval",
        };
        f.write_str(s)
    }
}

/// Display metadata for the deployed commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub message: String,
    pub author: String,
    pub date: Option<DateTime<Utc>>,
}

impl From<ci_models::CommitSummary> for CommitMeta {
    fn from(summary: ci_models::CommitSummary) -> Self {
        Self {
            message: summary.message,
            author: summary.author,
            date: summary.date,
        }
    }
}

/// One file recorded right after a successful deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Forward-slash path relative to the target directory
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// A single attempt to promote a commit to the live directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: u64,
    pub commit_hash: String,
    #[serde(default)]
    pub commit: CommitMeta,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub workflow_run_id: Option<u64>,
    #[serde(default)]
    pub build_url: Option<String>,
    #[serde(default)]
    pub backup_path: Option<String>,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub manifest: Option<Vec<ManifestEntry>>,
    pub trigger: TriggerKind,
    /// `0` for automated triggers
    #[serde(default)]
    pub actor: u64,
    pub created_at: DateTime<Utc>,
    /// When the remote build was triggered; build timeouts count from here
    #[serde(default)]
    pub building_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Pending or building
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Fields supplied when creating a deployment record
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub commit_hash: String,
    pub commit: CommitMeta,
    pub trigger: TriggerKind,
    pub actor: u64,
}

/// Partial update; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct DeploymentUpdate {
    pub status: Option<DeploymentStatus>,
    pub workflow_run_id: Option<u64>,
    pub build_url: Option<String>,
    pub backup_path: Option<String>,
    /// Appended to the step log as a timestamped line
    pub log_line: Option<String>,
    pub error_message: Option<String>,
    pub manifest: Option<Vec<ManifestEntry>>,
    pub building_since: Option<DateTime<Utc>>,
    pub deployed_at: Option<DateTime<Utc>>,
}

impl DeploymentUpdate {
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: Some(DeploymentStatus::Failed),
            log_line: Some(format!("Failed: {}", error)),
            error_message: Some(error),
            ..Default::default()
        }
    }

    pub fn log(line: impl Into<String>) -> Self {
        Self {
            log_line: Some(line.into()),
            ..Default::default()
        }
    }
}
