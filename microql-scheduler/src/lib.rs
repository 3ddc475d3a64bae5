//! Wave-parallel DAG executor and result-selection for MicroQL (§4.4).
//!
//! `run` drives a compiled `Plan` to completion: execute every wave, apply
//! the configured (or auto-) result selection, then tear down every
//! registered service — regardless of whether execution or selection
//! succeeded, mirroring a `finally` block.

mod execute;
mod select;

pub use execute::execute;
pub use select::select;

use serde_json::Value;

use microql_core::{MicroQlError, Plan};

/// Execute `plan`, select its result, and tear down every service.
///
/// Teardown iterates `plan.services` in full rather than `plan.used_services`
/// — function-typed arguments can route a call to a service no top-level
/// node directly names, so only the full registry gives every service a
/// teardown guarantee (see `Plan::used_services`'s doc comment).
pub async fn run(plan: &Plan) -> Result<Value, MicroQlError> {
    let outcome = execute::execute(plan).await.and_then(|()| select::select(plan));
    tear_down(plan).await;
    outcome
}

async fn tear_down(plan: &Plan) {
    for (name, service) in &plan.services {
        tracing::debug!(service = %name, "tearing down");
        service.tear_down().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use microql_core::{compile, Args, Config, Service, ServiceRegistry};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct EchoService;

    #[async_trait]
    impl Service for EchoService {
        fn actions(&self) -> &[&str] {
            &["identity"]
        }
        async fn call(&self, _action: &str, args: Args) -> Result<Value, MicroQlError> {
            microql_core::args_to_json(&args)
        }
    }

    struct CountingTeardownService {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Service for CountingTeardownService {
        fn actions(&self) -> &[&str] {
            &["noop"]
        }
        async fn call(&self, _action: &str, _args: Args) -> Result<Value, MicroQlError> {
            Ok(Value::Null)
        }
        async fn tear_down(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn run_selects_and_tears_down_every_registered_service() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut services: ServiceRegistry = HashMap::new();
        services.insert("echo".to_string(), Arc::new(EchoService));
        services.insert(
            "counted".to_string(),
            Arc::new(CountingTeardownService { count: Arc::clone(&count) }),
        );

        let config: Config = serde_json::from_value(json!({
            "queries": {"a": ["echo", "identity", {"value": 1}]},
            "select": "a"
        }))
        .unwrap();
        let plan = compile(&config, services).unwrap();
        let out = run(&plan).await.unwrap();
        assert_eq!(out, json!(1));
        // torn down even though its action was never actually invoked.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_tears_down_services_even_when_execution_fails() {
        struct FailingService;
        #[async_trait]
        impl Service for FailingService {
            fn actions(&self) -> &[&str] {
                &["boom"]
            }
            async fn call(&self, _action: &str, _args: Args) -> Result<Value, MicroQlError> {
                Err(MicroQlError::service("boom"))
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let mut services: ServiceRegistry = HashMap::new();
        services.insert("failing".to_string(), Arc::new(FailingService));
        services.insert(
            "counted".to_string(),
            Arc::new(CountingTeardownService { count: Arc::clone(&count) }),
        );

        let config: Config = serde_json::from_value(json!({
            "queries": {"a": ["failing", "boom", {}]}
        }))
        .unwrap();
        let plan = compile(&config, services).unwrap();
        let err = run(&plan).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
