use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::resolve::ResultsView;

/// The shared, append-only map of completed query results a `Plan` executes
/// into (§4.3, §4.4). Scoped to a single `execute()` call — never a
/// process-wide singleton.
#[derive(Debug, Default)]
pub struct ResultsMap {
    entries: DashMap<String, Value>,
}

impl ResultsMap {
    pub fn new() -> Self {
        ResultsMap { entries: DashMap::new() }
    }

    /// Record `name`'s result. Each query name is written exactly once by
    /// the scheduler; a second write would indicate a compiler bug.
    pub fn insert(&self, name: String, value: Value) {
        self.entries.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.get(name).map(|r| r.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, for final result selection (§4.7).
    pub fn to_map(&self) -> Map<String, Value> {
        self.entries.iter().map(|r| (r.key().clone(), r.value().clone())).collect()
    }
}

impl ResultsView for ResultsMap {
    fn get(&self, name: &str) -> Option<Value> {
        ResultsMap::get(self, name)
    }

    fn snapshot_public(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .filter(|r| !r.key().starts_with('_'))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        Value::Object(map)
    }
}
