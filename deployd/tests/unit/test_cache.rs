//! Response cache and key-value store tests

use std::sync::Arc;
use std::time::Duration;

use deployd::cache::response::{CacheTtls, ResponseCache};
use deployd::filesys::file::File;
use deployd::storage::kv::{KeyValueStore, KvStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Listing {
    names: Vec<String>,
}

fn listing() -> Listing {
    Listing {
        names: vec!["main".to_string(), "develop".to_string()],
    }
}

fn cache() -> ResponseCache {
    ResponseCache::new(Arc::new(KvStore::in_memory()), CacheTtls::default())
}

#[test]
fn test_key_depends_on_path_and_params() {
    let a = ResponseCache::key("/repos/acme/site/branches", &[]);
    let b = ResponseCache::key("/repos/acme/site/branches", &[]);
    let c = ResponseCache::key("/repos/acme/site/commits", &[("sha", "main".to_string())]);
    let d = ResponseCache::key("/repos/acme/site/commits", &[("sha", "dev".to_string())]);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(c, d);
    assert!(a.starts_with("ci_cache:"));
}

#[tokio::test]
async fn test_insert_and_get() {
    let cache = cache();
    let key = ResponseCache::key("/user/repos", &[]);

    assert_eq!(cache.get::<Listing>(&key).await, None);
    cache.insert(&key, &listing(), Duration::from_secs(60)).await;
    assert_eq!(cache.get::<Listing>(&key).await, Some(listing()));

    cache.remove(&key).await;
    assert_eq!(cache.get::<Listing>(&key).await, None);
}

#[tokio::test]
async fn test_entries_expire() {
    let cache = cache();
    let key = ResponseCache::key("/user/repos", &[]);

    cache.insert(&key, &listing(), Duration::from_millis(50)).await;
    assert!(cache.get::<Listing>(&key).await.is_some());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(cache.get::<Listing>(&key).await, None);
}

#[tokio::test]
async fn test_undecodable_entry_is_a_miss() {
    let store = Arc::new(KvStore::in_memory());
    let cache = ResponseCache::new(store.clone(), CacheTtls::default());
    let key = ResponseCache::key("/user/repos", &[]);

    store.set(&key, "not json", None).await.unwrap();
    assert_eq!(cache.get::<Listing>(&key).await, None);
}

#[tokio::test]
async fn test_file_store_drops_expired_entries_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let store = KvStore::open(File::new(path.clone())).await.unwrap();
    store.set("persisted", "yes", None).await.unwrap();
    store
        .set("short", "gone", Some(Duration::from_millis(20)))
        .await
        .unwrap();
    drop(store);
    tokio::time::sleep(Duration::from_millis(60)).await;

    let reopened = KvStore::open(File::new(path)).await.unwrap();
    assert_eq!(
        reopened.get("persisted").await.unwrap().as_deref(),
        Some("yes")
    );
    assert_eq!(reopened.get("short").await.unwrap(), None);
}
