//! Content-addressed result caching for MicroQL (§4.9 "caching").
//!
//! A cache key is the SHA-256 digest of the canonical `(service, action,
//! args)` triple — `serde_json`'s default `Map` is a `BTreeMap`, so
//! serializing it already produces key-sorted, canonical JSON. Stores are
//! handed to a `Plan` explicitly by the embedding application; there is no
//! process-wide singleton, so two concurrent `query()` calls never share a
//! cache unless the caller chooses to share one.

mod disk;
mod memory;

pub use disk::DiskStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// One cached entry, as persisted by any `CacheStore` (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub value: Value,
}

impl CacheEntry {
    pub fn fresh(value: Value, ttl: Option<Duration>) -> Self {
        let created_at = chrono::Utc::now();
        let expires_at = ttl.and_then(|d| chrono::Duration::from_std(d).ok()).map(|d| created_at + d);
        CacheEntry { created_at, expires_at, value }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(expiry) if chrono::Utc::now() >= expiry)
    }
}

/// The SHA-256 fingerprint of one `(service, action, args)` call (§4.9).
pub fn fingerprint(service: &str, action: &str, args: &Value) -> String {
    let payload = serde_json::json!({"service": service, "action": action, "args": args});
    // `to_string` on a Value backed by an ordered (BTreeMap) Map is already
    // canonical — no extra key-sorting pass required.
    let canonical = serde_json::to_string(&payload).expect("json values always serialize");
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}

/// A pluggable cache backend. Implement this to back caching with Redis,
/// a shared KV store, etc. — the engine only ever talks to this trait.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, service: &str, action: &str, key: &str) -> Option<Value>;
    async fn set(&self, service: &str, action: &str, key: &str, value: Value, ttl: Option<Duration>);
    async fn remove(&self, service: &str, action: &str, key: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_stable_regardless_of_arg_insertion_order() {
        let a = fingerprint("fieldAgent", "findAnimal", &json!({"animal": "Monkey", "zone": "north"}));
        let b = fingerprint("fieldAgent", "findAnimal", &json!({"zone": "north", "animal": "Monkey"}));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_action() {
        let a = fingerprint("fieldAgent", "findAnimal", &json!({"animal": "Monkey"}));
        let b = fingerprint("fieldAgent", "tranquilize", &json!({"animal": "Monkey"}));
        assert_ne!(a, b);
    }

    #[test]
    fn entry_without_ttl_never_expires() {
        let entry = CacheEntry::fresh(json!(1), None);
        assert!(!entry.is_expired());
    }
}
