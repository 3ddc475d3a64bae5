use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{CacheEntry, CacheStore};

/// A disk-backed cache store laid out as
/// `<configDir>/<service>-<action>/<key>.json` (§4.9 "disk layout"), one
/// JSON file per entry. Read/write failures are treated as cache misses
/// rather than propagated — a corrupt or missing cache file should never
/// fail a query that would otherwise succeed uncached.
#[derive(Clone)]
pub struct DiskStore {
    config_dir: PathBuf,
}

impl DiskStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        DiskStore { config_dir: config_dir.into() }
    }

    fn entry_path(&self, service: &str, action: &str, key: &str) -> PathBuf {
        self.config_dir.join(format!("{service}-{action}")).join(format!("{key}.json"))
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get(&self, service: &str, action: &str, key: &str) -> Option<Value> {
        let path = self.entry_path(service, action, key);
        let raw = tokio::fs::read(&path).await.ok()?;
        let entry: CacheEntry = serde_json::from_slice(&raw).ok()?;
        if entry.is_expired() {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        Some(entry.value)
    }

    async fn set(&self, service: &str, action: &str, key: &str, value: Value, ttl: Option<Duration>) {
        let path = self.entry_path(service, action, key);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(dir = %parent.display(), error = %e, "failed to create cache directory");
                return;
            }
        }
        let entry = CacheEntry::fresh(value, ttl);
        match serde_json::to_vec_pretty(&entry) {
            Ok(raw) => {
                if let Err(e) = tokio::fs::write(&path, raw).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to write cache entry");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize cache entry"),
        }
    }

    async fn remove(&self, service: &str, action: &str, key: &str) {
        let _ = tokio::fs::remove_file(self.entry_path(service, action, key)).await;
    }
}

/// Exposed for callers that want to pre-create the cache root (e.g. tests).
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn round_trips_through_the_configured_directory() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        store.set("fieldAgent", "findAnimal", "abc123", json!({"name": "Bert"}), None).await;
        assert_eq!(
            store.get("fieldAgent", "findAnimal", "abc123").await,
            Some(json!({"name": "Bert"}))
        );
        assert!(dir.path().join("fieldAgent-findAnimal").join("abc123.json").exists());
    }

    #[tokio::test]
    async fn missing_entry_is_a_miss_not_an_error() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        assert_eq!(store.get("fieldAgent", "findAnimal", "missing").await, None);
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        store
            .set("fieldAgent", "findAnimal", "abc123", json!(1), Some(Duration::from_millis(10)))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("fieldAgent", "findAnimal", "abc123").await, None);
        assert!(!dir.path().join("fieldAgent-findAnimal").join("abc123.json").exists());
    }
}
