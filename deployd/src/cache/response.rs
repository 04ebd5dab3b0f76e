//! CI response cache
//!
//! Short-lived cache for list-style read endpoints, stored in the key-value
//! store. Entries expire on their own and are never invalidated by writes.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::storage::kv::KeyValueStore;
use crate::utils::sha256_hash;

const KEY_PREFIX: &str = "ci_cache:";

/// Cache lifetimes per endpoint family
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    /// Commits, workflows, repositories, branches
    pub listings: Duration,

    /// Workflow run listings, kept short so new runs are matched quickly
    pub runs: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            listings: Duration::from_secs(300),
            runs: Duration::from_secs(30),
        }
    }
}

/// TTL cache over the key-value store
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    ttls: CacheTtls,
}

impl ResponseCache {
    /// Create a new response cache
    pub fn new(store: Arc<dyn KeyValueStore>, ttls: CacheTtls) -> Self {
        Self { store, ttls }
    }

    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    /// Cache key for an endpoint and its query parameters
    pub fn key(path: &str, params: &[(&str, String)]) -> String {
        let mut raw = path.to_string();
        for (name, value) in params {
            raw.push_str(&format!("&{}={}", name, value));
        }
        format!("{}{}", KEY_PREFIX, sha256_hash(raw.as_bytes()))
    }

    /// Get a cached response; store failures and stale shapes read as misses
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Response cache read failed: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!("Response cache hit: {}", key);
                Some(value)
            }
            Err(e) => {
                debug!("Dropping undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Insert a response
    pub async fn insert<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Response cache encode failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(key, &raw, Some(ttl)).await {
            warn!("Response cache write failed: {}", e);
        }
    }

    /// Remove a response
    pub async fn remove(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!("Response cache delete failed: {}", e);
        }
    }
}
