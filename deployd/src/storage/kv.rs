//! Key-value store with per-entry expiry
//!
//! Backs the deployment lock and the CI response cache. All mutations happen
//! under one async mutex, so `compare_and_set` is atomic for every caller in
//! the process. The file-backed variant rewrites the whole map atomically on
//! each mutation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::filesys::file::File;

/// Key-value store trait for testability and backend swaps
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get an unexpired value
    async fn get(&self, key: &str) -> Result<Option<String>, DeployError>;

    /// Set a value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), DeployError>;

    /// Remove a value (idempotent)
    async fn delete(&self, key: &str) -> Result<(), DeployError>;

    /// Write `value` only if the current unexpired value equals `expected`
    /// (`None` meaning absent or expired). Returns whether the write happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DeployError>;

    /// Remove the value only if it still equals `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, DeployError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .and_then(|ttl| Utc::now().checked_add_signed(ttl)),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory store, optionally persisted to a JSON file
pub struct KvStore {
    entries: Mutex<HashMap<String, Entry>>,
    file: Option<File>,
}

impl KvStore {
    /// Volatile store
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            file: None,
        }
    }

    /// File-backed store, loading any existing state
    pub async fn open(file: File) -> Result<Self, DeployError> {
        let entries = if file.exists().await {
            match file.read_json::<HashMap<String, Entry>>().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Discarding unreadable state file {:?}: {}", file.path(), e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        debug!("Loaded {} key-value entries from {:?}", entries.len(), file.path());

        Ok(Self {
            entries: Mutex::new(entries),
            file: Some(file),
        })
    }

    async fn persist(&self, entries: &mut HashMap<String, Entry>) -> Result<(), DeployError> {
        let now = Utc::now();
        entries.retain(|_, e| !e.is_expired(now));
        if let Some(file) = &self.file {
            file.write_json(entries).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for KvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DeployError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(Utc::now()))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), DeployError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), Entry::new(value, ttl));
        self.persist(&mut entries).await
    }

    async fn delete(&self, key: &str) -> Result<(), DeployError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.persist(&mut entries).await?;
        }
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DeployError> {
        let mut entries = self.entries.lock().await;
        let current = entries
            .get(key)
            .filter(|e| !e.is_expired(Utc::now()))
            .map(|e| e.value.as_str());

        if current != expected {
            return Ok(false);
        }

        entries.insert(key.to_string(), Entry::new(value, ttl));
        self.persist(&mut entries).await?;
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, DeployError> {
        let mut entries = self.entries.lock().await;
        let matches = entries
            .get(key)
            .is_some_and(|e| !e.is_expired(Utc::now()) && e.value == expected);
        if !matches {
            return Ok(false);
        }

        entries.remove(key);
        self.persist(&mut entries).await?;
        Ok(true)
    }
}
