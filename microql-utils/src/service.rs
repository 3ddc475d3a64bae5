use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use microql_core::{ArgType, ArgValue, Args, MicroQlError, ResultsMap, Service, Snapshot};

/// The default `util` service (§4.9): `identity`, `template`, `map`,
/// `filter`, `reduce`, `print`, and `snapshot`.
///
/// `snapshot` needs to see the live results map, which a plain `Service`
/// has no way to reach — the compiler only ever hands a service its
/// already-resolved `Args`. A caller wires this up by registering a
/// `UtilService` and, once `compile()` has produced a `Plan`, calling
/// `bind_results` with `Arc::clone(&plan.results)` before `execute()` runs.
/// The cell is set exactly once per `UtilService` instance — this is state
/// scoped to one `query()` call, not a process-wide singleton.
pub struct UtilService {
    snapshot_path: Option<PathBuf>,
    results: OnceLock<Arc<ResultsMap>>,
}

impl UtilService {
    pub fn new(snapshot_path: Option<PathBuf>) -> Self {
        UtilService { snapshot_path, results: OnceLock::new() }
    }

    /// Bind the live results map this instance's `snapshot` action will
    /// read from. Called once, after `compile()`, before `execute()`.
    pub fn bind_results(&self, results: Arc<ResultsMap>) {
        let _ = self.results.set(results);
    }

    fn arg(args: &Args, key: &str) -> Value {
        args.get(key).and_then(ArgValue::as_json).cloned().unwrap_or(Value::Null)
    }

    async fn call_identity(&self, args: Args) -> Result<Value, MicroQlError> {
        Ok(Self::arg(&args, "value"))
    }

    async fn call_template(&self, args: Args) -> Result<Value, MicroQlError> {
        microql_core::args_to_json(&args)
    }

    async fn call_map(&self, args: Args) -> Result<Value, MicroQlError> {
        let items = Self::items(&args)?;
        let func = Self::function(&args, "fn")?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(func.call(item).await?);
        }
        Ok(Value::Array(out))
    }

    async fn call_filter(&self, args: Args) -> Result<Value, MicroQlError> {
        let items = Self::items(&args)?;
        let func = Self::function(&args, "fn")?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if is_truthy(&func.call(item.clone()).await?) {
                out.push(item);
            }
        }
        Ok(Value::Array(out))
    }

    async fn call_reduce(&self, args: Args) -> Result<Value, MicroQlError> {
        let items = Self::items(&args)?;
        let func = Self::function(&args, "fn")?;
        let mut acc = Self::arg(&args, "initial");
        for item in items {
            acc = func.call(json!({"acc": acc, "item": item})).await?;
        }
        Ok(acc)
    }

    async fn call_print(&self, args: Args) -> Result<Value, MicroQlError> {
        let value = Self::arg(&args, "value");
        match args.get("label").and_then(ArgValue::as_json) {
            Some(Value::String(label)) => tracing::info!(label = %label, value = %value, "util:print"),
            _ => tracing::info!(value = %value, "util:print"),
        }
        Ok(value)
    }

    async fn call_snapshot(&self, args: Args) -> Result<Value, MicroQlError> {
        let path = self
            .snapshot_path
            .as_ref()
            .ok_or_else(|| MicroQlError::service("util:snapshot called with no snapshot path configured"))?;
        let results = self
            .results
            .get()
            .ok_or_else(|| MicroQlError::service("util:snapshot called before results were bound"))?;

        let restore_timestamp = match args.get("snapshotRestoreTimestamp").and_then(ArgValue::as_json) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };

        if let Some(wanted) = &restore_timestamp {
            if let Ok(existing) = Snapshot::load(path) {
                if &existing.timestamp == wanted {
                    return Ok(json!({"timestamp": existing.timestamp, "path": path.display().to_string()}));
                }
            }
        }

        let timestamp = chrono::Utc::now().to_rfc3339();
        let snapshot = Snapshot::new(timestamp.clone(), results.to_map());
        snapshot.save(path)?;
        Ok(json!({"timestamp": timestamp, "path": path.display().to_string()}))
    }

    fn items(args: &Args) -> Result<Vec<Value>, MicroQlError> {
        match Self::arg(args, "items") {
            Value::Array(items) => Ok(items),
            other => Err(MicroQlError::service(format!(
                "'items' must be an array, got {other}"
            ))),
        }
    }

    fn function<'a>(args: &'a Args, key: &str) -> Result<&'a microql_core::BoundCallable, MicroQlError> {
        args.get(key)
            .and_then(ArgValue::as_function)
            .ok_or_else(|| MicroQlError::service(format!("'{key}' must be a function-typed argument")))
    }
}

/// Truthiness for `filter`'s predicate result — `false`, `null`, and
/// absence are falsy; everything else (including `0` and `""`, matching
/// JSON Schema's notion of "present" rather than a dynamic language's
/// falsy-value rules) is truthy.
fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Bool(false) | Value::Null)
}

#[async_trait]
impl Service for UtilService {
    fn actions(&self) -> &[&str] {
        &["identity", "template", "map", "filter", "reduce", "print", "snapshot"]
    }

    async fn call(&self, action: &str, args: Args) -> Result<Value, MicroQlError> {
        match action {
            "identity" => self.call_identity(args).await,
            "template" => self.call_template(args).await,
            "map" => self.call_map(args).await,
            "filter" => self.call_filter(args).await,
            "reduce" => self.call_reduce(args).await,
            "print" => self.call_print(args).await,
            "snapshot" => self.call_snapshot(args).await,
            other => Err(MicroQlError::service(format!("util has no action '{other}'"))),
        }
    }

    fn arg_type(&self, action: &str, arg: &str) -> Option<ArgType> {
        match (action, arg) {
            ("map" | "filter" | "reduce", "fn") => Some(ArgType::Function),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microql_core::{compile, Config, ServiceRegistry};
    use serde_json::json;
    use std::collections::HashMap;

    fn util_registry() -> (Arc<UtilService>, ServiceRegistry) {
        let util = Arc::new(UtilService::new(None));
        let mut services: ServiceRegistry = HashMap::new();
        services.insert("util".to_string(), Arc::clone(&util) as Arc<dyn Service>);
        (util, services)
    }

    #[tokio::test]
    async fn identity_returns_its_value_verbatim() {
        let (_util, services) = util_registry();
        let config: Config = serde_json::from_value(json!({
            "queries": {"a": ["util", "identity", {"value": 42}]}
        }))
        .unwrap();
        let plan = compile(&config, services).unwrap();
        let node = plan.nodes.get("a").unwrap();
        let out = microql_core::Invokable::invoke(
            node.as_ref(),
            &plan.results,
            &microql_core::ContextStack::empty(),
        )
        .await
        .unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn map_applies_fn_to_every_item_in_order() {
        let (_util, services) = util_registry();
        let config: Config = serde_json::from_value(json!({
            "queries": {
                "a": ["util", "map", {
                    "items": [1, 2, 3],
                    "fn": ["util", "identity", {"value": "@"}]
                }]
            }
        }))
        .unwrap();
        let plan = compile(&config, services).unwrap();
        let node = plan.nodes.get("a").unwrap();
        let out = microql_core::Invokable::invoke(
            node.as_ref(),
            &plan.results,
            &microql_core::ContextStack::empty(),
        )
        .await
        .unwrap();
        assert_eq!(out, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn filter_keeps_only_truthy_results() {
        let (_util, services) = util_registry();
        let config: Config = serde_json::from_value(json!({
            "queries": {
                "a": ["util", "filter", {
                    "items": [1, 2, 3, 4],
                    "fn": ["util", "identity", {"value": false}]
                }]
            }
        }))
        .unwrap();
        let plan = compile(&config, services).unwrap();
        let node = plan.nodes.get("a").unwrap();
        let out = microql_core::Invokable::invoke(
            node.as_ref(),
            &plan.results,
            &microql_core::ContextStack::empty(),
        )
        .await
        .unwrap();
        assert_eq!(out, json!([]));
    }

    #[tokio::test]
    async fn reduce_folds_left_with_acc_and_item() {
        let (_util, services) = util_registry();
        let config: Config = serde_json::from_value(json!({
            "queries": {
                "a": ["util", "reduce", {
                    "items": [1, 2, 3],
                    "initial": 0,
                    "fn": ["util", "identity", {"value": "@.acc"}]
                }]
            }
        }))
        .unwrap();
        let plan = compile(&config, services).unwrap();
        let node = plan.nodes.get("a").unwrap();
        let out = microql_core::Invokable::invoke(
            node.as_ref(),
            &plan.results,
            &microql_core::ContextStack::empty(),
        )
        .await
        .unwrap();
        assert_eq!(out, json!(0));
    }

    #[tokio::test]
    async fn snapshot_without_a_configured_path_is_a_service_error() {
        let util = UtilService::new(None);
        util.bind_results(Arc::new(ResultsMap::new()));
        let err = util.call("snapshot", Args::new()).await.unwrap_err();
        assert!(err.to_string().contains("no snapshot path"));
    }

    #[tokio::test]
    async fn snapshot_writes_and_then_skips_on_matching_restore_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let util = UtilService::new(Some(path.clone()));
        let results = Arc::new(ResultsMap::new());
        results.insert("a".to_string(), json!(1));
        util.bind_results(Arc::clone(&results));

        let first = util.call("snapshot", Args::new()).await.unwrap();
        let timestamp = first["timestamp"].as_str().unwrap().to_string();

        let mut args = Args::new();
        args.insert("snapshotRestoreTimestamp".to_string(), ArgValue::Json(json!(timestamp)));
        let second = util.call("snapshot", args).await.unwrap();
        assert_eq!(second["timestamp"], json!(timestamp));
    }
}
