use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::MicroQlError;

/// `settings.inspect` (§6 config shape) — forwarded verbatim to `withDebug`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InspectSettings {
    #[serde(default)]
    pub depth: Option<u32>,
    #[serde(default = "default_true")]
    pub colors: bool,
    #[serde(default)]
    pub max_array_length: Option<usize>,
    #[serde(default)]
    pub max_string_length: Option<usize>,
    #[serde(default)]
    pub compact: bool,
}

fn default_true() -> bool {
    true
}

impl Default for InspectSettings {
    fn default() -> Self {
        InspectSettings {
            depth: None,
            colors: true,
            max_array_length: None,
            max_string_length: None,
            compact: false,
        }
    }
}

/// The top-level `settings` block of a `Config` (§6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryDefault>,
    #[serde(default)]
    pub rate_limit: HashMap<String, u64>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub on_error: Option<Value>,
    #[serde(default)]
    pub ignore_errors: bool,
    #[serde(default)]
    pub inspect: InspectSettings,
    #[serde(default = "default_true")]
    pub auto_select: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryDefault {
    #[serde(default)]
    pub default: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    pub config_dir: String,
}

/// A per-node cache directive, parsed from the reserved `cache` argument key.
/// May be a bare `true`/`false`, or `{invalidateAfter: "1h"}`.
#[derive(Debug, Clone)]
pub struct CacheSpec {
    pub enabled: bool,
    pub invalidate_after: Option<Duration>,
}

impl CacheSpec {
    fn from_value(value: &Value) -> Result<Self, MicroQlError> {
        match value {
            Value::Bool(b) => Ok(CacheSpec { enabled: *b, invalidate_after: None }),
            Value::Object(map) => {
                let invalidate_after = match map.get("invalidateAfter") {
                    Some(Value::String(s)) => Some(parse_duration_string(s)?),
                    Some(Value::Null) | None => None,
                    Some(_) => {
                        return Err(MicroQlError::compile(
                            "cache.invalidateAfter must be a duration string",
                        ))
                    }
                };
                Ok(CacheSpec { enabled: true, invalidate_after })
            }
            Value::Null => Ok(CacheSpec { enabled: false, invalidate_after: None }),
            _ => Err(MicroQlError::compile("cache must be a bool or object")),
        }
    }
}

/// Parse a duration string of the form `"1h"`, `"30m"`, `"7d"`, `"500ms"`, `"10s"`.
pub fn parse_duration_string(s: &str) -> Result<Duration, MicroQlError> {
    let s = s.trim();
    let split_at = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| MicroQlError::compile(format!("invalid duration string '{s}'")))?;
    let (num, unit) = s.split_at(split_at);
    let num: u64 = num
        .parse()
        .map_err(|_| MicroQlError::compile(format!("invalid duration string '{s}'")))?;
    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        "d" => Duration::from_secs(num * 86400),
        other => {
            return Err(MicroQlError::compile(format!(
                "unknown duration unit '{other}' in '{s}'"
            )))
        }
    };
    Ok(duration)
}

/// The merged, per-node settings a wrapper pipeline consumes (§4.3, §6).
///
/// Built by layering, right-to-left with reserved args winning:
/// service metadata defaults < global `settings` < query-level `settings` <
/// reserved argument keys on the descriptor itself.
#[derive(Debug, Clone, Default)]
pub struct CallSettings {
    pub debug: bool,
    pub timeout: Option<u64>,
    pub retry: u32,
    pub on_error: Option<Value>,
    pub ignore_errors: bool,
    pub cache: Option<CacheSpec>,
    pub precheck: Option<Value>,
    pub postcheck: Option<Value>,
    pub no_timeout_default: bool,
    pub inspect: InspectSettings,
}

/// Reserved argument keys the engine consumes rather than forwarding to the
/// service action (§6 "Reserved argument keys").
pub const RESERVED_KEYS: &[&str] =
    &["timeout", "retry", "onError", "ignoreErrors", "cache", "precheck", "postcheck", "debug"];

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Merge global settings, an optional query-level `settings` override, and
/// the reserved keys pulled out of one descriptor's args map.
pub fn merge_settings(
    global: &GlobalSettings,
    query_settings: Option<&Value>,
    reserved_args: &serde_json::Map<String, Value>,
    no_timeout_default: bool,
) -> Result<CallSettings, MicroQlError> {
    let mut merged = CallSettings {
        debug: global.debug,
        timeout: global.timeout,
        retry: global.retry.as_ref().and_then(|r| r.default).unwrap_or(0),
        on_error: global.on_error.clone(),
        ignore_errors: global.ignore_errors,
        cache: None,
        precheck: None,
        postcheck: None,
        no_timeout_default,
        inspect: global.inspect.clone(),
    };

    if let Some(Value::Object(qs)) = query_settings {
        if let Some(Value::Bool(b)) = qs.get("debug") {
            merged.debug = *b;
        }
        if let Some(t) = qs.get("timeout").and_then(Value::as_u64) {
            merged.timeout = Some(t);
        }
        if let Some(r) = qs.get("retry").and_then(Value::as_u64) {
            merged.retry = r as u32;
        }
        if let Some(oe) = qs.get("onError") {
            merged.on_error = Some(oe.clone());
        }
        if let Some(Value::Bool(b)) = qs.get("ignoreErrors") {
            merged.ignore_errors = *b;
        }
    }

    if let Some(v) = reserved_args.get("debug") {
        if let Value::Bool(b) = v {
            merged.debug = *b;
        }
    }
    if let Some(v) = reserved_args.get("timeout").and_then(Value::as_u64) {
        merged.timeout = Some(v);
    }
    if let Some(v) = reserved_args.get("retry").and_then(Value::as_u64) {
        merged.retry = v as u32;
    }
    if let Some(v) = reserved_args.get("onError") {
        merged.on_error = Some(v.clone());
    }
    if let Some(Value::Bool(b)) = reserved_args.get("ignoreErrors") {
        merged.ignore_errors = *b;
    }
    if let Some(v) = reserved_args.get("cache") {
        merged.cache = Some(CacheSpec::from_value(v)?);
    }
    if let Some(v) = reserved_args.get("precheck") {
        merged.precheck = Some(v.clone());
    }
    if let Some(v) = reserved_args.get("postcheck") {
        merged.postcheck = Some(v.clone());
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reserved_args_win_over_query_and_global_settings() {
        let global = GlobalSettings { timeout: Some(1000), ..Default::default() };
        let query_settings = json!({"timeout": 2000});
        let mut reserved = serde_json::Map::new();
        reserved.insert("timeout".to_string(), json!(3000));
        let merged = merge_settings(&global, Some(&query_settings), &reserved, false).unwrap();
        assert_eq!(merged.timeout, Some(3000));
    }

    #[test]
    fn query_settings_win_over_global_when_no_reserved_override() {
        let global = GlobalSettings { timeout: Some(1000), ..Default::default() };
        let query_settings = json!({"timeout": 2000});
        let reserved = serde_json::Map::new();
        let merged = merge_settings(&global, Some(&query_settings), &reserved, false).unwrap();
        assert_eq!(merged.timeout, Some(2000));
    }

    #[test]
    fn parses_duration_strings() {
        assert_eq!(parse_duration_string("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration_string("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration_string("7d").unwrap(), Duration::from_secs(7 * 86400));
        assert!(parse_duration_string("bogus").is_err());
    }
}
