//! Test fixtures shared across MicroQL's crates: a `StubService` test
//! double and a `run_query` one-shot helper combining `compile` +
//! `microql_scheduler::run` so integration tests can go from a raw
//! `serde_json::Value` config straight to a selected result.

mod stub;

pub use stub::{Call, StubService};

use serde_json::Value;
use std::sync::Arc;

use microql_core::{compile, Config, MicroQlError, ServiceRegistry};
use microql_utils::UtilService;

/// Compile and run `config` against `services`, auto-registering the
/// default `util` service (§4.9) under the `"util"` name unless the caller
/// already supplied one, and binding its snapshot access to the plan's
/// results map the way the `microql` facade does in production.
pub async fn run_query(config: Value, mut services: ServiceRegistry) -> Result<Value, MicroQlError> {
    let config: Config = serde_json::from_value(config)
        .map_err(|e| MicroQlError::compile(format!("invalid config: {e}")))?;

    let util = Arc::new(UtilService::new(None));
    services.entry("util".to_string()).or_insert_with(|| util.clone());

    let plan = compile(&config, services)?;
    util.bind_results(Arc::clone(&plan.results));

    microql_scheduler::run(&plan).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn runs_a_query_against_a_stub_service() {
        let stub = StubService::new(vec!["greet"]).respond("greet", json!("hello"));
        let mut services: ServiceRegistry = ServiceRegistry::new();
        services.insert("greeter".to_string(), Arc::new(stub));

        let config = json!({
            "queries": {"g": ["greeter", "greet", {}]},
            "select": "g"
        });
        let out = run_query(config, services).await.unwrap();
        assert_eq!(out, json!("hello"));
    }

    #[tokio::test]
    async fn auto_registers_util_when_the_caller_omits_it() {
        let config = json!({
            "queries": {"n": ["util", "identity", {"value": 42}]},
            "select": "n"
        });
        let out = run_query(config, ServiceRegistry::new()).await.unwrap();
        assert_eq!(out, json!(42));
    }
}
