//! Single-flight deployment lock
//!
//! A lease over one named slot: whoever holds it may mutate the target
//! directory or drive the CI service for one deployment. The lease expires on
//! its own after the TTL, which is how a crashed deployment stops blocking
//! later ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::storage::kv::KeyValueStore;

/// Key of the only lock slot
pub const LOCK_KEY: &str = "deployd:deployment_lock";

/// Current lease holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub deployment_id: u64,
    pub expires_at: DateTime<Utc>,
}

/// Result of an acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquire {
    Acquired,
    Held(LockHolder),
}

impl LockAcquire {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAcquire::Acquired)
    }
}

/// Mutex-with-lease abstraction, independent of the backing store
#[async_trait]
pub trait DeployLock: Send + Sync {
    /// Take the lease for `deployment_id`. Any live lease refuses, including
    /// one already owned by the same deployment; extend with `renew`.
    async fn acquire(&self, deployment_id: u64, ttl: Duration)
        -> Result<LockAcquire, DeployError>;

    /// Extend an owned lease; false if the lease is gone or owned by someone else
    async fn renew(&self, deployment_id: u64, ttl: Duration) -> Result<bool, DeployError>;

    /// Clear the slot if `deployment_id` still holds it; false otherwise
    async fn release(&self, deployment_id: u64) -> Result<bool, DeployError>;

    /// Unexpired holder, if any
    async fn holder(&self) -> Result<Option<LockHolder>, DeployError>;
}

/// Lease stored in a key-value slot, swapped with compare-and-set
pub struct KvDeployLock {
    store: Arc<dyn KeyValueStore>,
}

impl KvDeployLock {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn encode(deployment_id: u64, ttl: Duration) -> Result<String, DeployError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| DeployError::ConfigError(format!("invalid lock ttl: {}", e)))?;
        let holder = LockHolder {
            deployment_id,
            expires_at: Utc::now() + ttl,
        };
        Ok(serde_json::to_string(&holder)?)
    }
}

fn live_holder(raw: &str) -> Option<LockHolder> {
    match serde_json::from_str::<LockHolder>(raw) {
        Ok(holder) if holder.expires_at > Utc::now() => Some(holder),
        Ok(_) => None,
        Err(e) => {
            warn!("Ignoring corrupt deployment lock slot: {}", e);
            None
        }
    }
}

#[async_trait]
impl DeployLock for KvDeployLock {
    async fn acquire(
        &self,
        deployment_id: u64,
        ttl: Duration,
    ) -> Result<LockAcquire, DeployError> {
        let stored = self.store.get(LOCK_KEY).await?;
        if let Some(holder) = stored.as_deref().and_then(live_holder) {
            debug!(
                "Deployment lock held by #{} until {}",
                holder.deployment_id, holder.expires_at
            );
            return Ok(LockAcquire::Held(holder));
        }

        // Expired and corrupt values are replaced, but only if nobody touched
        // the slot since it was read
        let value = Self::encode(deployment_id, ttl)?;
        if self
            .store
            .compare_and_set(LOCK_KEY, stored.as_deref(), &value, Some(ttl))
            .await?
        {
            debug!("Deployment lock acquired by #{}", deployment_id);
            return Ok(LockAcquire::Acquired);
        }

        // Lost a race, report whoever won
        match self.holder().await? {
            Some(holder) => Ok(LockAcquire::Held(holder)),
            None => Err(DeployError::StorageError(
                "deployment lock changed during acquisition".to_string(),
            )),
        }
    }

    async fn renew(&self, deployment_id: u64, ttl: Duration) -> Result<bool, DeployError> {
        let Some(stored) = self.store.get(LOCK_KEY).await? else {
            return Ok(false);
        };
        match live_holder(&stored) {
            Some(holder) if holder.deployment_id == deployment_id => {
                let value = Self::encode(deployment_id, ttl)?;
                self.store
                    .compare_and_set(LOCK_KEY, Some(&stored), &value, Some(ttl))
                    .await
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, deployment_id: u64) -> Result<bool, DeployError> {
        let Some(stored) = self.store.get(LOCK_KEY).await? else {
            return Ok(false);
        };
        match live_holder(&stored) {
            Some(holder) if holder.deployment_id == deployment_id => {
                let released = self.store.compare_and_delete(LOCK_KEY, &stored).await?;
                if released {
                    debug!("Deployment lock released by #{}", deployment_id);
                }
                Ok(released)
            }
            _ => Ok(false),
        }
    }

    async fn holder(&self) -> Result<Option<LockHolder>, DeployError> {
        let stored = self.store.get(LOCK_KEY).await?;
        Ok(stored.as_deref().and_then(live_holder))
    }
}
