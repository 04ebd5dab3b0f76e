//! Finite state machine for deployment records

use serde::{Deserialize, Serialize};

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Created, build not yet triggered (or awaiting approval)
    Pending,

    /// Build triggered on the CI service
    Building,

    /// Artifact deployed to the target directory
    Success,

    /// Trigger, build or deploy failed
    Failed,

    /// Restored from the backup taken before this deployment
    RolledBack,

    /// Cancelled before completion
    Cancelled,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
            DeploymentStatus::Cancelled => "cancelled",
        }
    }

    /// No further build activity will happen for this deployment
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeploymentStatus::Pending | DeploymentStatus::Building)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Remote build accepted
    BuildTriggered,

    /// Remote build could not be triggered
    TriggerFailed(String),

    /// Artifact deployed
    Deployed,

    /// Build or deploy failed
    Failed(String),

    /// Cancelled by an operator
    Cancel,

    /// Backup restored
    RollBack,
}

/// Compute the next status for an event, rejecting edges outside the state machine
pub fn transition(
    state: DeploymentStatus,
    event: &DeploymentEvent,
) -> Result<DeploymentStatus, String> {
    use DeploymentEvent as E;
    use DeploymentStatus as S;

    let next = match (state, event) {
        // From Pending
        (S::Pending, E::BuildTriggered) => S::Building,
        (S::Pending, E::TriggerFailed(_)) => S::Failed,
        (S::Pending, E::Cancel) => S::Cancelled,

        // From Building
        (S::Building, E::Deployed) => S::Success,
        (S::Building, E::Failed(_)) => S::Failed,
        (S::Building, E::Cancel) => S::Cancelled,

        // From Success
        (S::Success, E::RollBack) => S::RolledBack,

        // Invalid transitions
        (state, event) => {
            return Err(format!("{} -> {:?}", state, event));
        }
    };

    Ok(next)
}
