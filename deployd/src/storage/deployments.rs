//! Deployment record persistence

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::deployment::{Deployment, DeploymentUpdate, NewDeployment};

/// Deployment repository trait
#[async_trait]
pub trait DeploymentRepo: Send + Sync {
    /// Create a `pending` record and return its id
    async fn insert_deployment(&self, new: NewDeployment) -> Result<u64, DeployError>;

    /// Apply a partial update, returning the updated record
    async fn update_deployment(
        &self,
        id: u64,
        update: DeploymentUpdate,
    ) -> Result<Deployment, DeployError>;

    async fn get_deployment(&self, id: u64) -> Result<Option<Deployment>, DeployError>;

    async fn get_deployment_by_run_id(&self, run_id: u64)
        -> Result<Option<Deployment>, DeployError>;

    /// Oldest first
    async fn list_pending_or_building(&self) -> Result<Vec<Deployment>, DeployError>;

    /// Newest first
    async fn list_deployments(&self, limit: usize) -> Result<Vec<Deployment>, DeployError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Records {
    next_id: u64,
    deployments: Vec<Deployment>,
}

/// JSON-file-backed repository (or volatile when no file is given)
pub struct JsonDeploymentRepo {
    records: RwLock<Records>,
    file: Option<File>,
}

impl JsonDeploymentRepo {
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(Records {
                next_id: 1,
                deployments: Vec::new(),
            }),
            file: None,
        }
    }

    pub async fn open(file: File) -> Result<Self, DeployError> {
        let mut records = if file.exists().await {
            file.read_json::<Records>().await?
        } else {
            Records::default()
        };
        let max_id = records.deployments.iter().map(|d| d.id).max().unwrap_or(0);
        records.next_id = records.next_id.max(max_id + 1);
        debug!(
            "Loaded {} deployment records from {:?}",
            records.deployments.len(),
            file.path()
        );

        Ok(Self {
            records: RwLock::new(records),
            file: Some(file),
        })
    }

    async fn persist(&self, records: &Records) -> Result<(), DeployError> {
        if let Some(file) = &self.file {
            file.write_json(records).await?;
        }
        Ok(())
    }
}

fn apply_update(deployment: &mut Deployment, update: DeploymentUpdate) -> Result<(), DeployError> {
    if let Some(manifest) = update.manifest {
        if deployment.manifest.is_some() {
            return Err(DeployError::StorageError(format!(
                "manifest of deployment #{} is already recorded",
                deployment.id
            )));
        }
        deployment.manifest = Some(manifest);
    }
    if let Some(backup_path) = update.backup_path {
        if deployment.backup_path.is_some() {
            return Err(DeployError::StorageError(format!(
                "backup of deployment #{} is already recorded",
                deployment.id
            )));
        }
        deployment.backup_path = Some(backup_path);
    }
    if let Some(status) = update.status {
        deployment.status = status;
    }
    if let Some(run_id) = update.workflow_run_id {
        deployment.workflow_run_id = Some(run_id);
    }
    if let Some(url) = update.build_url {
        deployment.build_url = Some(url);
    }
    if let Some(error) = update.error_message {
        deployment.error_message = Some(error);
    }
    if let Some(at) = update.building_since {
        deployment.building_since = Some(at);
    }
    if let Some(at) = update.deployed_at {
        deployment.deployed_at = Some(at);
    }
    if let Some(line) = update.log_line {
        deployment
            .log
            .push_str(&format!("[{}] {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"), line));
    }
    Ok(())
}

#[async_trait]
impl DeploymentRepo for JsonDeploymentRepo {
    async fn insert_deployment(&self, new: NewDeployment) -> Result<u64, DeployError> {
        let mut records = self.records.write().await;
        let id = records.next_id;
        records.next_id += 1;
        records.deployments.push(Deployment {
            id,
            commit_hash: new.commit_hash,
            commit: new.commit,
            status: DeploymentStatus::Pending,
            workflow_run_id: None,
            build_url: None,
            backup_path: None,
            log: String::new(),
            error_message: None,
            manifest: None,
            trigger: new.trigger,
            actor: new.actor,
            created_at: Utc::now(),
            building_since: None,
            deployed_at: None,
        });
        self.persist(&records).await?;
        Ok(id)
    }

    async fn update_deployment(
        &self,
        id: u64,
        update: DeploymentUpdate,
    ) -> Result<Deployment, DeployError> {
        let mut records = self.records.write().await;
        let deployment = records
            .deployments
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| DeployError::NotFound(format!("deployment #{}", id)))?;

        // Validate on a copy so a rejected update leaves the record untouched
        let mut updated = deployment.clone();
        apply_update(&mut updated, update)?;
        *deployment = updated.clone();

        self.persist(&records).await?;
        Ok(updated)
    }

    async fn get_deployment(&self, id: u64) -> Result<Option<Deployment>, DeployError> {
        let records = self.records.read().await;
        Ok(records.deployments.iter().find(|d| d.id == id).cloned())
    }

    async fn get_deployment_by_run_id(
        &self,
        run_id: u64,
    ) -> Result<Option<Deployment>, DeployError> {
        let records = self.records.read().await;
        Ok(records
            .deployments
            .iter()
            .rev()
            .find(|d| d.workflow_run_id == Some(run_id))
            .cloned())
    }

    async fn list_pending_or_building(&self) -> Result<Vec<Deployment>, DeployError> {
        let records = self.records.read().await;
        Ok(records
            .deployments
            .iter()
            .filter(|d| d.is_active())
            .cloned()
            .collect())
    }

    async fn list_deployments(&self, limit: usize) -> Result<Vec<Deployment>, DeployError> {
        let records = self.records.read().await;
        Ok(records.deployments.iter().rev().take(limit).cloned().collect())
    }
}
