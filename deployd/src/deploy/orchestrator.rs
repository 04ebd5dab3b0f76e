//! Deployment orchestrator
//!
//! Drives deployment records through the state machine: trigger the remote
//! build, match and poll its run, then download, back up, install and record
//! the artifact. Every call returns once the current step is done; progress
//! while a build runs comes from the poller or from webhook deliveries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ci_models::{CommitSummary, WorkflowRun};
use tracing::{debug, error, info, warn};

use crate::deploy::archive::{
    create_archive, extract_archive, install_archive, prune_backups, restore_backup,
};
use crate::deploy::drift::build_manifest;
use crate::deploy::fetcher::ArtifactFetcher;
use crate::deploy::fsm::{transition, DeploymentEvent, DeploymentStatus};
use crate::deploy::lock::{DeployLock, LockAcquire, LockHolder};
use crate::errors::DeployError;
use crate::http::client::CiClient;
use crate::http::runs::match_run;
use crate::models::deployment::{
    CommitMeta, Deployment, DeploymentUpdate, NewDeployment, TriggerKind,
};
use crate::storage::deployments::DeploymentRepo;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::short_sha;

/// Runs fetched when matching a deployment to its build
const RECENT_RUNS_LIMIT: u32 = 10;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub workflow: String,
    pub branch: String,
    pub target_dir: PathBuf,
    pub create_backups: bool,
    pub clean_install: bool,
    pub max_backups: usize,
    pub build_timeout: Duration,
    pub lock_ttl: Duration,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            workflow: settings.github.workflow.clone(),
            branch: settings.github.branch.clone(),
            target_dir: PathBuf::from(&settings.deploy.target_dir),
            create_backups: settings.deploy.create_backups,
            clean_install: settings.deploy.clean_install,
            max_backups: settings.deploy.max_backups,
            build_timeout: Duration::from_secs(settings.deploy.build_timeout_secs),
            lock_ttl: Duration::from_secs(settings.deploy.lock_ttl_secs),
        }
    }
}

/// Result of starting or approving a deployment
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// Build triggered, record is `building`
    Started(Deployment),

    /// Another deployment is in flight; nothing was triggered
    Blocked {
        deployment_id: u64,
        status: DeploymentStatus,
    },

    /// The trigger call failed, record is `failed`
    Failed(Deployment),
}

/// Result of one polling step for a building deployment
#[derive(Debug, Clone)]
pub enum BuildCheck {
    /// No run for the commit has shown up yet
    NoRunYet,

    /// Run found, still going
    Waiting(Deployment),

    Deployed(Deployment),

    Failed(Deployment),

    /// Exceeded the build timeout and was failed
    TimedOut(Deployment),

    /// Someone else holds the lock; revisit later
    LockBusy(LockHolder),

    /// Record is no longer `building`; nothing to do
    Skipped(DeploymentStatus),
}

/// Deployment orchestrator
pub struct Orchestrator {
    ci: Arc<CiClient>,
    fetcher: Arc<ArtifactFetcher>,
    repo: Arc<dyn DeploymentRepo>,
    lock: Arc<dyn DeployLock>,
    layout: StorageLayout,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        ci: Arc<CiClient>,
        fetcher: Arc<ArtifactFetcher>,
        repo: Arc<dyn DeploymentRepo>,
        lock: Arc<dyn DeployLock>,
        layout: StorageLayout,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ci,
            fetcher,
            repo,
            lock,
            layout,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn repo(&self) -> &Arc<dyn DeploymentRepo> {
        &self.repo
    }

    pub fn ci(&self) -> &Arc<CiClient> {
        &self.ci
    }

    /// Load a deployment or fail with `NotFound`
    pub async fn load(&self, id: u64) -> Result<Deployment, DeployError> {
        self.repo
            .get_deployment(id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("deployment #{}", id)))
    }

    /// Apply an event to a record, refusing edges outside the state machine
    async fn advance(
        &self,
        deployment: &Deployment,
        event: DeploymentEvent,
        mut update: DeploymentUpdate,
    ) -> Result<Deployment, DeployError> {
        let next =
            transition(deployment.status, &event).map_err(DeployError::InvalidTransition)?;
        update.status = Some(next);
        match next {
            DeploymentStatus::Building if update.building_since.is_none() => {
                update.building_since = Some(Utc::now());
            }
            DeploymentStatus::Success if update.deployed_at.is_none() => {
                update.deployed_at = Some(Utc::now());
            }
            _ => {}
        }
        debug!(
            "Deployment #{}: {} -> {}",
            deployment.id, deployment.status, next
        );
        self.repo.update_deployment(deployment.id, update).await
    }

    async fn status_of(&self, id: u64) -> Result<DeploymentStatus, DeployError> {
        Ok(self
            .repo
            .get_deployment(id)
            .await?
            .map(|d| d.status)
            .unwrap_or(DeploymentStatus::Building))
    }

    /// Another deployment that must finish before `exclude` may build
    async fn blocking_deployment(
        &self,
        exclude: Option<u64>,
    ) -> Result<Option<(u64, DeploymentStatus)>, DeployError> {
        let building = self
            .repo
            .list_pending_or_building()
            .await?
            .into_iter()
            .find(|d| d.status == DeploymentStatus::Building && Some(d.id) != exclude);
        if let Some(d) = building {
            return Ok(Some((d.id, d.status)));
        }

        if let Some(holder) = self.lock.holder().await? {
            if Some(holder.deployment_id) != exclude {
                let status = self.status_of(holder.deployment_id).await?;
                return Ok(Some((holder.deployment_id, status)));
            }
        }
        Ok(None)
    }

    async fn release_lock(&self, deployment_id: u64) {
        match self.lock.release(deployment_id).await {
            Ok(true) => {}
            Ok(false) => warn!("Deployment lock of #{} lapsed before release", deployment_id),
            Err(e) => warn!(
                "Failed to release deployment lock for #{}: {}",
                deployment_id, e
            ),
        }
    }

    /// Head commit of the tracked branch
    pub async fn resolve_branch_head(&self) -> Result<CommitSummary, DeployError> {
        self.ci
            .list_commits(&self.config.branch, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                DeployError::NotFound(format!("no commits on branch {}", self.config.branch))
            })
    }

    async fn commit_meta(&self, commit_hash: &str) -> CommitMeta {
        match self.ci.get_commit(commit_hash).await {
            Ok(summary) => summary.into(),
            Err(e) => {
                warn!("Could not fetch commit {}: {}", short_sha(commit_hash), e);
                CommitMeta::default()
            }
        }
    }

    /// Record a `pending` deployment without triggering anything
    pub async fn queue_deployment(
        &self,
        commit_hash: &str,
        trigger: TriggerKind,
        actor: u64,
        commit: Option<CommitMeta>,
    ) -> Result<Deployment, DeployError> {
        let commit = match commit {
            Some(commit) => commit,
            None => self.commit_meta(commit_hash).await,
        };
        let id = self
            .repo
            .insert_deployment(NewDeployment {
                commit_hash: commit_hash.to_string(),
                commit,
                trigger,
                actor,
            })
            .await?;
        info!(
            "Deployment #{} created for {} ({})",
            id,
            short_sha(commit_hash),
            trigger
        );
        self.repo
            .update_deployment(
                id,
                DeploymentUpdate::log(format!("Created by {} trigger", trigger)),
            )
            .await
    }

    /// Create a deployment and trigger its build
    pub async fn start_deployment(
        &self,
        commit_hash: &str,
        trigger: TriggerKind,
        actor: u64,
        commit: Option<CommitMeta>,
    ) -> Result<StartOutcome, DeployError> {
        if let Some((deployment_id, status)) = self.blocking_deployment(None).await? {
            info!(
                "Not starting {}: deployment #{} is {}",
                short_sha(commit_hash),
                deployment_id,
                status
            );
            return Ok(StartOutcome::Blocked {
                deployment_id,
                status,
            });
        }

        let deployment = self
            .queue_deployment(commit_hash, trigger, actor, commit)
            .await?;
        let outcome = self.trigger_build(&deployment).await?;

        // Lost a race with a concurrent start after the record was created
        if matches!(outcome, StartOutcome::Blocked { .. }) {
            let current = self.load(deployment.id).await?;
            self.advance(
                &current,
                DeploymentEvent::Cancel,
                DeploymentUpdate::log("Cancelled, another deployment started first"),
            )
            .await?;
        }
        Ok(outcome)
    }

    /// Approve a `pending` deployment and trigger its build
    pub async fn approve_pending_deployment(
        &self,
        id: u64,
        actor: u64,
    ) -> Result<StartOutcome, DeployError> {
        let deployment = self.load(id).await?;
        if deployment.status != DeploymentStatus::Pending {
            return Err(DeployError::InvalidTransition(format!(
                "deployment #{} is {}, only pending deployments can be approved",
                id, deployment.status
            )));
        }

        if let Some((deployment_id, status)) = self.blocking_deployment(Some(id)).await? {
            return Ok(StartOutcome::Blocked {
                deployment_id,
                status,
            });
        }

        let deployment = self
            .repo
            .update_deployment(id, DeploymentUpdate::log(format!("Approved by {}", actor)))
            .await?;
        info!("Deployment #{} approved by {}", id, actor);
        self.trigger_build(&deployment).await
    }

    /// Trigger the remote build for a `pending` record under the lock
    async fn trigger_build(&self, deployment: &Deployment) -> Result<StartOutcome, DeployError> {
        let id = deployment.id;
        if let LockAcquire::Held(holder) = self.lock.acquire(id, self.config.lock_ttl).await? {
            let status = self.status_of(holder.deployment_id).await?;
            return Ok(StartOutcome::Blocked {
                deployment_id: holder.deployment_id,
                status,
            });
        }

        let result = self.trigger_locked(deployment).await;
        self.release_lock(id).await;
        result
    }

    async fn trigger_locked(&self, deployment: &Deployment) -> Result<StartOutcome, DeployError> {
        if let Some((deployment_id, status)) = self.blocking_deployment(Some(deployment.id)).await?
        {
            return Ok(StartOutcome::Blocked {
                deployment_id,
                status,
            });
        }

        match self
            .ci
            .trigger_workflow(&self.config.workflow, &self.config.branch)
            .await
        {
            Ok(()) => {
                let updated = self
                    .advance(
                        deployment,
                        DeploymentEvent::BuildTriggered,
                        DeploymentUpdate::log(format!(
                            "Triggered workflow {} on {}",
                            self.config.workflow, self.config.branch
                        )),
                    )
                    .await?;
                info!("Deployment #{} is building", updated.id);
                Ok(StartOutcome::Started(updated))
            }
            Err(e) => {
                error!("Failed to trigger build for #{}: {}", deployment.id, e);
                let message = format!("Failed to trigger build: {}", e);
                let updated = self
                    .advance(
                        deployment,
                        DeploymentEvent::TriggerFailed(message.clone()),
                        DeploymentUpdate::failed(message),
                    )
                    .await?;
                Ok(StartOutcome::Failed(updated))
            }
        }
    }

    /// Poll every `building` deployment once
    pub async fn poll_active(&self) -> Result<usize, DeployError> {
        let active = self.repo.list_pending_or_building().await?;
        let mut polled = 0;
        for deployment in active
            .into_iter()
            .filter(|d| d.status == DeploymentStatus::Building)
        {
            polled += 1;
            match self.find_and_poll(deployment.id).await {
                Ok(BuildCheck::LockBusy(holder)) => {
                    debug!(
                        "Deployment #{} waits for lock held by #{}",
                        deployment.id, holder.deployment_id
                    );
                }
                Ok(outcome) => {
                    debug!("Polled deployment #{}: {}", deployment.id, outcome_name(&outcome))
                }
                Err(e) => warn!("Polling deployment #{} failed: {}", deployment.id, e),
            }
        }
        Ok(polled)
    }

    /// Match a `building` deployment to its run if needed, then check it
    pub async fn find_and_poll(&self, id: u64) -> Result<BuildCheck, DeployError> {
        let deployment = self.load(id).await?;
        if deployment.status != DeploymentStatus::Building {
            return Ok(BuildCheck::Skipped(deployment.status));
        }

        let since = deployment.building_since.unwrap_or(deployment.created_at);
        let age = Utc::now() - since;
        if age.to_std().is_ok_and(|age| age > self.config.build_timeout) {
            return self.time_out(deployment).await;
        }

        if deployment.workflow_run_id.is_some() {
            return self.check_build_status(id).await;
        }

        let runs = self
            .ci
            .list_recent_runs(&self.config.workflow, Some(&self.config.branch), RECENT_RUNS_LIMIT)
            .await?;
        let Some(run) = match_run(&runs, &deployment.commit_hash) else {
            debug!(
                "No run for {} yet (deployment #{})",
                short_sha(&deployment.commit_hash),
                id
            );
            return Ok(BuildCheck::NoRunYet);
        };

        self.link_run(&deployment, run.id, Some(run.html_url.clone()))
            .await?;
        self.check_build_status(id).await
    }

    /// Record the CI run that builds a deployment
    pub async fn link_run(
        &self,
        deployment: &Deployment,
        run_id: u64,
        build_url: Option<String>,
    ) -> Result<Deployment, DeployError> {
        info!("Deployment #{} matched run {}", deployment.id, run_id);
        self.repo
            .update_deployment(
                deployment.id,
                DeploymentUpdate {
                    workflow_run_id: Some(run_id),
                    build_url,
                    log_line: Some(format!("Matched workflow run {}", run_id)),
                    ..Default::default()
                },
            )
            .await
    }

    async fn time_out(&self, deployment: Deployment) -> Result<BuildCheck, DeployError> {
        warn!(
            "Deployment #{} exceeded the build timeout of {:?}",
            deployment.id, self.config.build_timeout
        );
        if let Some(run_id) = deployment.workflow_run_id {
            if let Err(e) = self.ci.cancel_run(run_id).await {
                debug!("Cancelling timed out run {} failed: {}", run_id, e);
            }
        }
        let message = format!("build timed out after {:?}", self.config.build_timeout);
        let updated = self
            .advance(
                &deployment,
                DeploymentEvent::Failed(message.clone()),
                DeploymentUpdate::failed(message),
            )
            .await?;
        Ok(BuildCheck::TimedOut(updated))
    }

    /// Check the linked run and act on its conclusion
    pub async fn check_build_status(&self, id: u64) -> Result<BuildCheck, DeployError> {
        let deployment = self.load(id).await?;
        if deployment.status != DeploymentStatus::Building {
            return Ok(BuildCheck::Skipped(deployment.status));
        }
        let Some(run_id) = deployment.workflow_run_id else {
            return Ok(BuildCheck::NoRunYet);
        };

        let run = self.ci.get_run_status(run_id).await?;
        self.apply_run_result(deployment, &run).await
    }

    async fn apply_run_result(
        &self,
        deployment: Deployment,
        run: &WorkflowRun,
    ) -> Result<BuildCheck, DeployError> {
        if !run.status.is_completed() {
            debug!("Run {} for #{} is {:?}", run.id, deployment.id, run.status);
            return Ok(BuildCheck::Waiting(deployment));
        }
        if run.succeeded() {
            return self.process_successful_build(deployment.id).await;
        }

        let conclusion = run.conclusion.as_deref().unwrap_or("unknown");
        Ok(BuildCheck::Failed(
            self.fail_build(&deployment, conclusion).await?,
        ))
    }

    /// Mark a `building` deployment failed after an unsuccessful run
    pub async fn fail_build(
        &self,
        deployment: &Deployment,
        conclusion: &str,
    ) -> Result<Deployment, DeployError> {
        let message = format!("Build concluded with {}", conclusion);
        warn!("Deployment #{}: {}", deployment.id, message);
        self.advance(
            deployment,
            DeploymentEvent::Failed(message.clone()),
            DeploymentUpdate::failed(message),
        )
        .await
    }

    /// Download, back up, install and record the artifact of a finished run
    pub async fn process_successful_build(&self, id: u64) -> Result<BuildCheck, DeployError> {
        match self.lock.acquire(id, self.config.lock_ttl).await? {
            LockAcquire::Acquired => {}
            LockAcquire::Held(holder) => {
                debug!(
                    "Deployment #{} deferred, lock held by #{}",
                    id, holder.deployment_id
                );
                return Ok(BuildCheck::LockBusy(holder));
            }
        }

        let result = self.process_locked(id).await;
        self.release_lock(id).await;
        result
    }

    async fn process_locked(&self, id: u64) -> Result<BuildCheck, DeployError> {
        // Webhooks and the poller may both get here for the same run
        let deployment = self.load(id).await?;
        if deployment.status != DeploymentStatus::Building {
            debug!("Deployment #{} already {}, skipping", id, deployment.status);
            return Ok(BuildCheck::Skipped(deployment.status));
        }

        match self.deploy_artifact(&deployment).await {
            Ok(updated) => {
                info!(
                    "Deployment #{} of {} succeeded",
                    id,
                    short_sha(&updated.commit_hash)
                );
                Ok(BuildCheck::Deployed(updated))
            }
            Err(e) => {
                let current = self.load(id).await?;
                if current.status != DeploymentStatus::Building {
                    info!(
                        "Deployment #{} became {} while deploying: {}",
                        id, current.status, e
                    );
                    return Ok(BuildCheck::Skipped(current.status));
                }
                error!("Deployment #{} failed: {}", id, e);
                let message = e.to_string();
                let updated = self
                    .advance(
                        &current,
                        DeploymentEvent::Failed(message.clone()),
                        DeploymentUpdate::failed(message),
                    )
                    .await?;
                Ok(BuildCheck::Failed(updated))
            }
        }
    }

    async fn deploy_artifact(&self, deployment: &Deployment) -> Result<Deployment, DeployError> {
        let id = deployment.id;
        let run_id = deployment.workflow_run_id.ok_or_else(|| {
            DeployError::DeployFailed(format!("deployment #{} has no workflow run", id))
        })?;

        let artifacts = self.ci.list_run_artifacts(run_id).await?;
        let artifact = artifacts
            .artifacts
            .into_iter()
            .find(|a| !a.expired)
            .ok_or_else(|| DeployError::DeployFailed("no artifacts".to_string()))?;

        let archive = self.artifact_path(id);
        self.fetcher.fetch(artifact.id, &archive).await?;
        self.repo
            .update_deployment(
                id,
                DeploymentUpdate::log(format!(
                    "Downloaded artifact {} ({} bytes)",
                    artifact.name, artifact.size_in_bytes
                )),
            )
            .await?;
        if !self.lock.renew(id, self.config.lock_ttl).await? {
            warn!("Deployment lock for #{} lapsed during download", id);
        }

        // A retry after a crash keeps the backup taken before the first overwrite
        if self.config.create_backups && deployment.backup_path.is_none() {
            let target = self.config.target_dir.clone();
            let backups = self.layout.backups_dir().path().to_path_buf();
            let stem = format!("backup-deployment-{}", id);
            let backup = tokio::task::spawn_blocking(move || {
                create_archive(&target, &backups, &stem)
            })
            .await??;

            let update = match backup {
                Some(path) => DeploymentUpdate {
                    backup_path: Some(path.to_string_lossy().into_owned()),
                    log_line: Some(format!("Backed up target to {}", path.display())),
                    ..Default::default()
                },
                None => DeploymentUpdate::log("No existing target directory, backup skipped"),
            };
            self.repo.update_deployment(id, update).await?;
        }

        // Cancelled while downloading or backing up
        let current = self.load(id).await?;
        if current.status != DeploymentStatus::Building {
            return Err(DeployError::DeployFailed(format!(
                "deployment #{} is {}, not installing",
                id, current.status
            )));
        }

        let target = self.config.target_dir.clone();
        let clean = self.config.clean_install;
        let source = archive.clone();
        let files = tokio::task::spawn_blocking(move || {
            if clean {
                install_archive(&source, &target)
            } else {
                extract_archive(&source, &target)
            }
        })
        .await??;

        let target = self.config.target_dir.clone();
        let manifest = tokio::task::spawn_blocking(move || build_manifest(&target)).await??;

        if self.config.max_backups > 0 {
            let backups = self.layout.backups_dir().path().to_path_buf();
            let keep = self.config.max_backups;
            match tokio::task::spawn_blocking(move || prune_backups(&backups, keep)).await? {
                Ok(removed) if !removed.is_empty() => {
                    info!("Pruned {} old backups", removed.len())
                }
                Ok(_) => {}
                Err(e) => warn!("Pruning backups failed: {}", e),
            }
        }

        let current = self.load(id).await?;
        self.advance(
            &current,
            DeploymentEvent::Deployed,
            DeploymentUpdate {
                manifest: Some(manifest),
                log_line: Some(format!("Deployed {} files", files)),
                ..Default::default()
            },
        )
        .await
    }

    /// Retained artifact archive of a deployment
    pub fn artifact_path(&self, id: u64) -> PathBuf {
        self.layout.artifact_archive(id).path().to_path_buf()
    }

    /// Restore the backup taken before a successful deployment
    pub async fn rollback_deployment(&self, id: u64) -> Result<Deployment, DeployError> {
        let deployment = self.load(id).await?;
        if deployment.status != DeploymentStatus::Success {
            return Err(DeployError::InvalidTransition(format!(
                "deployment #{} is {}, only successful deployments can be rolled back",
                id, deployment.status
            )));
        }
        let backup = deployment
            .backup_path
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .filter(|p| p.is_file())
            .ok_or_else(|| {
                DeployError::DeployFailed(format!("no backup available for deployment #{}", id))
            })?;

        if let LockAcquire::Held(holder) = self.lock.acquire(id, self.config.lock_ttl).await? {
            return Err(DeployError::LockHeld(holder.deployment_id));
        }

        let target = self.config.target_dir.clone();
        let restored = tokio::task::spawn_blocking(move || restore_backup(&backup, &target)).await;
        let result = match restored {
            Ok(Ok(files)) => {
                self.advance(
                    &deployment,
                    DeploymentEvent::RollBack,
                    DeploymentUpdate::log(format!("Rolled back, restored {} files", files)),
                )
                .await
            }
            Ok(Err(e)) => Err(e),
            Err(e) => Err(e.into()),
        };
        self.release_lock(id).await;

        match result {
            Ok(updated) => {
                info!("Deployment #{} rolled back", id);
                Ok(updated)
            }
            Err(e) => {
                error!("Rollback of #{} failed: {}", id, e);
                self.repo
                    .update_deployment(id, DeploymentUpdate::log(format!("Rollback failed: {}", e)))
                    .await?;
                Err(e)
            }
        }
    }

    /// Cancel a pending or building deployment
    pub async fn cancel_deployment(&self, id: u64) -> Result<Deployment, DeployError> {
        let deployment = self.load(id).await?;
        if !deployment.is_active() {
            return Err(DeployError::InvalidTransition(format!(
                "deployment #{} is {}, only pending or building deployments can be cancelled",
                id, deployment.status
            )));
        }

        // Its own live lease means a worker is acting on it right now
        if let Some(holder) = self.lock.holder().await? {
            if holder.deployment_id == id {
                return Err(DeployError::LockHeld(id));
            }
        }

        if let Some(run_id) = deployment.workflow_run_id {
            match self.ci.cancel_run(run_id).await {
                Ok(()) => info!("Requested cancellation of run {}", run_id),
                Err(e) => warn!("Cancelling run {} failed: {}", run_id, e),
            }
        }

        let updated = self
            .advance(
                &deployment,
                DeploymentEvent::Cancel,
                DeploymentUpdate::log("Cancelled"),
            )
            .await?;
        info!("Deployment #{} cancelled", id);
        Ok(updated)
    }
}

fn outcome_name(outcome: &BuildCheck) -> &'static str {
    match outcome {
        BuildCheck::NoRunYet => "no run yet",
        BuildCheck::Waiting(_) => "waiting",
        BuildCheck::Deployed(_) => "deployed",
        BuildCheck::Failed(_) => "failed",
        BuildCheck::TimedOut(_) => "timed out",
        BuildCheck::LockBusy(_) => "lock busy",
        BuildCheck::Skipped(_) => "skipped",
    }
}
