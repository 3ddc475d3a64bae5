use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::settings::GlobalSettings;

fn default_given() -> Value {
    Value::Object(Map::new())
}

/// How the final result is projected out of the completed results map (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Select {
    /// Return exactly this one query's result.
    One(String),
    /// Return an object containing exactly these query results.
    Many(Vec<String>),
}

/// The deserializable root of a MicroQL config document (§6 "Config shape").
///
/// `services` is deliberately absent here — the service registry is
/// supplied programmatically by the embedding application, not parsed out
/// of the document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Static input values addressable as `$.given…` — any JSON value, not
    /// just an object (§6 "given: <any>?").
    #[serde(default = "default_given")]
    pub given: Value,
    /// One Descriptor per top-level query name.
    pub queries: Map<String, Value>,
    #[serde(default)]
    pub settings: GlobalSettings,
    #[serde(default)]
    pub select: Option<Select>,
    /// Path to a snapshot file to resume from / record into (§4.8).
    #[serde(default)]
    pub snapshot: Option<String>,
}
