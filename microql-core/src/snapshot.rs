use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::error::MicroQlError;

/// The on-disk shape of a snapshot file (§4.8 "Snapshot / resume").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: String,
    pub results: Map<String, Value>,
}

impl Snapshot {
    pub fn new(timestamp: impl Into<String>, results: Map<String, Value>) -> Self {
        Snapshot { timestamp: timestamp.into(), results }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Snapshot, MicroQlError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MicroQlError::compile(format!("failed to read snapshot '{}': {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            MicroQlError::compile(format!("malformed snapshot '{}': {e}", path.display()))
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MicroQlError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MicroQlError::compile(format!("failed to create snapshot dir '{}': {e}", parent.display()))
            })?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| MicroQlError::compile(format!("failed to serialize snapshot: {e}")))?;
        std::fs::write(path, raw).map_err(|e| {
            MicroQlError::compile(format!("failed to write snapshot '{}': {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let mut results = Map::new();
        results.insert("animal".to_string(), json!({"name": "Bert"}));
        let snap = Snapshot::new("2026-07-26T00:00:00Z", results);
        snap.save(&path).unwrap();
        let loaded = Snapshot::load(&path).unwrap();
        assert_eq!(loaded.results.get("animal").unwrap(), &json!({"name": "Bert"}));
    }

    #[test]
    fn missing_file_is_a_compile_error() {
        let err = Snapshot::load("/nonexistent/path/snap.json").unwrap_err();
        assert!(err.is_compile());
    }
}
