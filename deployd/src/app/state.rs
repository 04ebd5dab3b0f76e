//! Application state management

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::info;

use crate::cache::response::{CacheTtls, ResponseCache};
use crate::deploy::drift::DriftDetector;
use crate::deploy::fetcher::ArtifactFetcher;
use crate::deploy::lock::{DeployLock, KvDeployLock};
use crate::deploy::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::errors::DeployError;
use crate::http::client::{CiClient, CiClientOptions};
use crate::storage::deployments::{DeploymentRepo, JsonDeploymentRepo};
use crate::storage::kv::{KeyValueStore, KvStore};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::webhook::ingest::{WebhookConfig, WebhookIngestor};

/// Timeout for artifact blob downloads
const BLOB_TIMEOUT: Duration = Duration::from_secs(600);

/// Main application state, constructed once at startup
pub struct AppState {
    /// Key-value store backing the lock and the response cache
    pub store: Arc<dyn KeyValueStore>,

    /// Deployment records
    pub repo: Arc<dyn DeploymentRepo>,

    /// CI client
    pub ci: Arc<CiClient>,

    /// Deployment lock
    pub lock: Arc<dyn DeployLock>,

    pub orchestrator: Arc<Orchestrator>,

    pub ingestor: Arc<WebhookIngestor>,

    pub drift: Arc<DriftDetector>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(settings: &Settings, layout: &StorageLayout) -> Result<Self, DeployError> {
        info!("Initializing application state...");
        layout.setup().await?;

        let store: Arc<dyn KeyValueStore> = Arc::new(KvStore::open(layout.state_file()).await?);
        let repo: Arc<dyn DeploymentRepo> =
            Arc::new(JsonDeploymentRepo::open(layout.deployments_file()).await?);

        let cache = Arc::new(ResponseCache::new(store.clone(), CacheTtls::default()));
        let ci = Arc::new(CiClient::new(
            CiClientOptions::new(
                &settings.github.api_base_url,
                SecretString::from(settings.github.token.clone()),
                &settings.github.owner,
                &settings.github.repo,
            ),
            Some(cache),
        )?);
        let fetcher = Arc::new(ArtifactFetcher::new(ci.clone(), BLOB_TIMEOUT)?);
        let lock: Arc<dyn DeployLock> = Arc::new(KvDeployLock::new(store.clone()));

        let config = OrchestratorConfig::from_settings(settings);
        let drift = Arc::new(DriftDetector::new(
            repo.clone(),
            layout.clone(),
            config.target_dir.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            ci.clone(),
            fetcher,
            repo.clone(),
            lock.clone(),
            layout.clone(),
            config,
        ));
        let ingestor = Arc::new(WebhookIngestor::new(
            orchestrator.clone(),
            WebhookConfig::from_settings(settings),
        ));

        Ok(Self {
            store,
            repo,
            ci,
            lock,
            orchestrator,
            ingestor,
            drift,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        info!("Shutting down application state...");
        if let Some(holder) = self.lock.holder().await? {
            info!(
                "Deployment lock still held by #{}, it expires at {}",
                holder.deployment_id, holder.expires_at
            );
        }
        Ok(())
    }
}
