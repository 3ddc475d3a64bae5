use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::{CacheEntry, CacheStore};

/// An in-process cache backed by `DashMap`, keyed by `"{service}-{action}/{key}"`.
/// Entries are lazily evicted on access once expired — there is no
/// background sweep.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore { entries: Arc::new(DashMap::new()) }
    }

    fn path_key(service: &str, action: &str, key: &str) -> String {
        format!("{service}-{action}/{key}")
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, service: &str, action: &str, key: &str) -> Option<Value> {
        let path_key = Self::path_key(service, action, key);
        if let Some(entry) = self.entries.get(&path_key) {
            if !entry.is_expired() {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove(&path_key);
        None
    }

    async fn set(&self, service: &str, action: &str, key: &str, value: Value, ttl: Option<Duration>) {
        let path_key = Self::path_key(service, action, key);
        self.entries.insert(path_key, CacheEntry::fresh(value, ttl));
    }

    async fn remove(&self, service: &str, action: &str, key: &str) {
        self.entries.remove(&Self::path_key(service, action, key));
    }
}
