use async_trait::async_trait;
use colored::{Color, Colorize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use microql_cache::{fingerprint, CacheStore};
use microql_rate_limit::RateLimiter;

use crate::context::ContextStack;
use crate::error::{ErrorContext, MicroQlError};
use crate::node::{CompiledArg, CompiledArgs, FunctionArg, Invokable};
use crate::resolve::resolve;
use crate::results::ResultsMap;
use crate::service::{args_to_json, Args, ArgValue, Service};
use crate::settings::{CallSettings, InspectSettings};
use crate::validate::validate_against_schema;

/// A compiled `onError` handler (§4.5 item 3, §8 scenario 6) — the same
/// Descriptor→Invokable machinery used for function-typed arguments, closed
/// over at compile time rather than left as the raw settings `Value`.
pub struct OnErrorHandler {
    pub func: FunctionArg,
    /// Whether the handler descriptor is itself a Chain — determines
    /// whether the failing error is pre-pushed so the chain's first step
    /// sees it at depth 2 via `@@` (§8 scenario 6).
    pub is_chain: bool,
}

/// The compiled, wound wrapper pipeline around one service call (§4.5,
/// §4.6):
///
/// ```text
/// withArgs (+ precheck) → withDebug → withErrorHandling → withRetry → withCache → withRateLimit → withTimeout (+ postcheck) → service.call
/// ```
///
/// `withArgs` and precheck run exactly once, outermost — resolved `$`/`@`
/// references and argument shape are never re-validated across retry
/// attempts. Postcheck instead runs innermost, immediately after the raw
/// service call returns, so a postcheck failure is itself retried like any
/// other error. A cache hit short-circuits before the rate limiter is
/// touched (§4.6: "cached responses bypass the limiter").
pub struct ServiceInvokable {
    pub service: Arc<dyn Service>,
    pub query_name: String,
    pub service_name: String,
    pub action: String,
    pub args: CompiledArgs,
    pub settings: CallSettings,
    pub on_error: Option<OnErrorHandler>,
    /// Shared with every other node compiled from the same `Plan` — never
    /// a process-wide singleton (§9).
    pub rate_limiter: Arc<RateLimiter>,
    /// `settings.rateLimit[serviceName]`, resolved once at compile time.
    pub rate_limit_ms: Option<u64>,
    /// Present whenever the plan's global `settings.cache.configDir` is set.
    pub cache: Option<Arc<dyn CacheStore>>,
}

#[async_trait]
impl Invokable for ServiceInvokable {
    async fn invoke(&self, results: &Arc<ResultsMap>, stack: &ContextStack) -> Result<Value, MicroQlError> {
        let args = self.with_args(results, stack).await?;
        if let Some(schema) = &self.settings.precheck {
            let as_json = args_to_json(&args).unwrap_or(Value::Null);
            validate_against_schema(&as_json, schema).map_err(|e| e.attribute(self.err_ctx()))?;
        }
        self.with_debug(results, stack, args).await
    }
}

impl ServiceInvokable {
    fn err_ctx(&self) -> ErrorContext {
        ErrorContext::new(self.query_name.clone(), self.service_name.clone(), self.action.clone())
    }

    async fn with_debug(
        &self,
        results: &Arc<ResultsMap>,
        stack: &ContextStack,
        args: Args,
    ) -> Result<Value, MicroQlError> {
        if !self.settings.debug {
            return self.with_error_handling(results, stack, args).await;
        }

        let color = service_color(&self.service_name);
        let args_json = args_to_json(&args).unwrap_or(Value::Null);
        print_debug_line(
            &format!(
                "{}:{} called with {}",
                self.service_name,
                self.action,
                render_value(&args_json, &self.settings.inspect)
            ),
            color,
            &self.settings.inspect,
        );
        tracing::debug!(query = %self.query_name, service = %self.service_name, action = %self.action, "calling");

        let start = std::time::Instant::now();
        let outcome = self.with_error_handling(results, stack, args).await;
        let elapsed_ms = start.elapsed().as_millis();

        match &outcome {
            Ok(value) => {
                print_debug_line(
                    &format!(
                        "{}:{} completed in {elapsed_ms}ms returning {}",
                        self.service_name,
                        self.action,
                        render_value(value, &self.settings.inspect)
                    ),
                    color,
                    &self.settings.inspect,
                );
                tracing::debug!(query = %self.query_name, service = %self.service_name, action = %self.action, elapsed_ms, "returned");
            }
            Err(e) => {
                print_debug_line(
                    &format!("{}:{} completed in {elapsed_ms}ms erroring {e}", self.service_name, self.action),
                    color,
                    &self.settings.inspect,
                );
                tracing::debug!(query = %self.query_name, service = %self.service_name, action = %self.action, elapsed_ms, error = %e, "errored");
            }
        }
        outcome
    }

    async fn with_error_handling(
        &self,
        results: &Arc<ResultsMap>,
        stack: &ContextStack,
        args: Args,
    ) -> Result<Value, MicroQlError> {
        match self.with_retry(args).await {
            Ok(value) => Ok(value),
            Err(err) => {
                let err = err.attribute(self.err_ctx());
                if let Some(handler) = &self.on_error {
                    let err_value = err.to_context_value();
                    let bind_stack =
                        if handler.is_chain { stack.extend(err_value.clone()) } else { stack.clone() };
                    let bound = handler.func.bind(Arc::clone(results), bind_stack);
                    if let Err(handler_err) = bound.call(err_value).await {
                        return Err(MicroQlError::handler(handler_err.to_string()).attribute(self.err_ctx()));
                    }
                }
                if self.settings.ignore_errors {
                    return Ok(Value::Null);
                }
                Err(err)
            }
        }
    }

    async fn with_retry(&self, args: Args) -> Result<Value, MicroQlError> {
        let mut attempt = 0;
        loop {
            match self.with_cache(args.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.settings.retry => {
                    attempt += 1;
                    tracing::debug!(query = %self.query_name, service = %self.service_name, attempt, "retrying after error: {err}");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Either serve a cache hit or fall through to `withRateLimit` and cache
    /// the result on success (§4.6). Only successful, postcheck-validated
    /// results are cached — an `onError`/`ignoreErrors` fallback never
    /// reaches this method, since those are handled one layer up in
    /// `with_error_handling`.
    async fn with_cache(&self, args: Args) -> Result<Value, MicroQlError> {
        let cache_spec = self.settings.cache.as_ref().filter(|spec| spec.enabled);
        let store = match (cache_spec, &self.cache) {
            (Some(spec), Some(store)) => Some((spec, store)),
            _ => None,
        };

        let Some((spec, store)) = store else {
            return self.with_rate_limit(args).await;
        };

        let args_json = args_to_json(&args).unwrap_or(Value::Null);
        let key = fingerprint(&self.service_name, &self.action, &args_json);
        if let Some(hit) = store.get(&self.service_name, &self.action, &key).await {
            return Ok(hit);
        }

        let value = self.with_rate_limit(args).await?;
        store.set(&self.service_name, &self.action, &key, value.clone(), spec.invalidate_after).await;
        Ok(value)
    }

    async fn with_rate_limit(&self, args: Args) -> Result<Value, MicroQlError> {
        if let Some(ms) = self.rate_limit_ms {
            self.rate_limiter.gate(&self.service_name, Duration::from_millis(ms)).await;
        }
        self.with_timeout(args).await
    }

    async fn with_timeout(&self, args: Args) -> Result<Value, MicroQlError> {
        let call = self.service.call(&self.action, args);
        let skip_timeout = self.settings.no_timeout_default || self.settings.timeout.is_none();
        let result = if skip_timeout {
            call.await.map_err(|e| e.attribute(self.err_ctx()))
        } else {
            let millis = self.settings.timeout.unwrap();
            match tokio::time::timeout(Duration::from_millis(millis), call).await {
                Ok(result) => result.map_err(|e| e.attribute(self.err_ctx())),
                Err(_) => Err(MicroQlError::timeout(millis).attribute(self.err_ctx())),
            }
        }?;

        if let Some(schema) = &self.settings.postcheck {
            validate_against_schema(&result, schema).map_err(|e| e.attribute(self.err_ctx()))?;
        }
        Ok(result)
    }

    async fn with_args(&self, results: &Arc<ResultsMap>, stack: &ContextStack) -> Result<Args, MicroQlError> {
        let mut out = Args::with_capacity(self.args.len());
        for (key, slot) in &self.args {
            let resolved = match slot {
                CompiledArg::Plain(value) => ArgValue::Json(
                    resolve(value, results.as_ref(), stack).map_err(|e| e.attribute(self.err_ctx()))?,
                ),
                CompiledArg::Function(func) => {
                    ArgValue::Function(func.bind(Arc::clone(results), stack.clone()))
                }
                CompiledArg::Settings => ArgValue::Json(settings_to_json(&self.settings)),
            };
            out.insert(key.clone(), resolved);
        }
        Ok(out)
    }
}

/// Render merged call settings as the plain JSON object a `Settings`-typed
/// argument receives (§6 "Settings-typed arguments").
fn settings_to_json(settings: &CallSettings) -> Value {
    serde_json::json!({
        "debug": settings.debug,
        "timeout": settings.timeout,
        "retry": settings.retry,
        "ignoreErrors": settings.ignore_errors,
    })
}

/// Deterministic per-service color so the same service name always renders
/// the same color across a run (§4.5 item 2).
fn service_color(service_name: &str) -> Color {
    const PALETTE: [Color; 6] =
        [Color::Cyan, Color::Magenta, Color::Yellow, Color::Green, Color::Blue, Color::Red];
    let hash = service_name.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    PALETTE[hash as usize % PALETTE.len()]
}

fn print_debug_line(line: &str, color: Color, inspect: &InspectSettings) {
    if inspect.colors {
        println!("{}", line.color(color));
    } else {
        println!("{line}");
    }
}

fn render_value(value: &Value, inspect: &InspectSettings) -> String {
    let truncated = truncate_value(value, inspect, 0);
    if inspect.compact {
        serde_json::to_string(&truncated).unwrap_or_else(|_| "null".to_string())
    } else {
        serde_json::to_string_pretty(&truncated).unwrap_or_else(|_| "null".to_string())
    }
}

/// Replace nested objects/arrays beyond `inspect.depth` with `"[Object]"` /
/// `"[Array]"` placeholders, and truncate long strings/arrays, mirroring
/// Node's `util.inspect` options carried by `settings.inspect` (§6).
fn truncate_value(value: &Value, inspect: &InspectSettings, depth: u32) -> Value {
    if let Some(max_depth) = inspect.depth {
        if depth > max_depth {
            return match value {
                Value::Object(_) => Value::String("[Object]".to_string()),
                Value::Array(_) => Value::String("[Array]".to_string()),
                other => other.clone(),
            };
        }
    }
    match value {
        Value::String(s) => match inspect.max_string_length {
            Some(max_len) if s.chars().count() > max_len => {
                let head: String = s.chars().take(max_len).collect();
                Value::String(format!("{head}…"))
            }
            _ => Value::String(s.clone()),
        },
        Value::Array(items) => {
            let limit = inspect.max_array_length.unwrap_or(items.len());
            let mut out: Vec<Value> =
                items.iter().take(limit).map(|v| truncate_value(v, inspect, depth + 1)).collect();
            if items.len() > limit {
                out.push(Value::String(format!("... {} more", items.len() - limit)));
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), truncate_value(v, inspect, depth + 1));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ArgType;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyService {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl Service for FlakyService {
        fn actions(&self) -> &[&str] {
            &["attempt"]
        }

        async fn call(&self, _action: &str, _args: Args) -> Result<Value, MicroQlError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(MicroQlError::service("not yet"));
            }
            Ok(Value::String("ok".to_string()))
        }

        fn arg_type(&self, _action: &str, _arg: &str) -> Option<ArgType> {
            None
        }
    }

    /// A service whose action always fails, for exercising `onError`.
    struct FailingService;

    #[async_trait]
    impl Service for FailingService {
        fn actions(&self) -> &[&str] {
            &["fail"]
        }

        async fn call(&self, _action: &str, _args: Args) -> Result<Value, MicroQlError> {
            Err(MicroQlError::service("Service failed"))
        }

        fn arg_type(&self, _action: &str, _arg: &str) -> Option<ArgType> {
            None
        }
    }

    fn test_invokable(service: Arc<dyn Service>, retry: u32) -> ServiceInvokable {
        ServiceInvokable {
            service,
            query_name: "q".to_string(),
            service_name: "flaky".to_string(),
            action: "attempt".to_string(),
            args: HashMap::new(),
            settings: CallSettings { retry, ..Default::default() },
            on_error: None,
            rate_limiter: Arc::new(RateLimiter::new()),
            rate_limit_ms: None,
            cache: None,
        }
    }

    #[tokio::test]
    async fn retries_up_to_configured_count_then_succeeds() {
        let service = Arc::new(FlakyService { fail_times: AtomicU32::new(2) });
        let invokable = test_invokable(service, 2);
        let results = Arc::new(ResultsMap::new());
        let stack = ContextStack::empty();
        let out = invokable.invoke(&results, &stack).await.unwrap();
        assert_eq!(out, Value::String("ok".to_string()));
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget_exhausted() {
        let service = Arc::new(FlakyService { fail_times: AtomicU32::new(5) });
        let invokable = test_invokable(service, 2);
        let results = Arc::new(ResultsMap::new());
        let stack = ContextStack::empty();
        let err = invokable.invoke(&results, &stack).await.unwrap_err();
        assert!(matches!(err, MicroQlError::Service { .. }));
    }

    #[tokio::test]
    async fn ignore_errors_swallows_failure_into_null() {
        let service = Arc::new(FlakyService { fail_times: AtomicU32::new(99) });
        let mut invokable = test_invokable(service, 0);
        invokable.settings.ignore_errors = true;
        let results = Arc::new(ResultsMap::new());
        let stack = ContextStack::empty();
        let out = invokable.invoke(&results, &stack).await.unwrap();
        assert_eq!(out, Value::Null);
    }

    #[tokio::test]
    async fn a_cache_hit_never_reaches_the_flaky_service() {
        use crate::settings::CacheSpec;
        use microql_cache::InMemoryStore;

        let service = Arc::new(FlakyService { fail_times: AtomicU32::new(0) });
        let mut invokable = test_invokable(service, 0);
        invokable.settings.cache = Some(CacheSpec { enabled: true, invalidate_after: None });
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new());
        invokable.cache = Some(Arc::clone(&store));

        let results = Arc::new(ResultsMap::new());
        let stack = ContextStack::empty();
        let first = invokable.invoke(&results, &stack).await.unwrap();
        assert_eq!(first, Value::String("ok".to_string()));

        // Now the underlying service would error on every call; a cache hit
        // must still return the previously-cached success.
        let failing = Arc::new(FlakyService { fail_times: AtomicU32::new(99) });
        let mut second_invokable = test_invokable(failing, 0);
        second_invokable.settings.cache = Some(CacheSpec { enabled: true, invalidate_after: None });
        second_invokable.cache = Some(store);
        let second = second_invokable.invoke(&results, &stack).await.unwrap();
        assert_eq!(second, Value::String("ok".to_string()));
    }

    #[tokio::test]
    async fn postcheck_failure_is_retried_like_any_other_error() {
        // Always returns a value that fails the postcheck schema, so retry
        // exhausts its budget and the final error is a Validation error, not
        // a single-shot failure from outside the retry loop.
        let service = Arc::new(FlakyService { fail_times: AtomicU32::new(0) });
        let mut invokable = test_invokable(service, 2);
        invokable.settings.postcheck = Some(json!({"type": "number"}));
        let results = Arc::new(ResultsMap::new());
        let stack = ContextStack::empty();
        let err = invokable.invoke(&results, &stack).await.unwrap_err();
        assert!(matches!(err, MicroQlError::Validation { .. }));
    }

    #[tokio::test]
    async fn on_error_handler_runs_and_original_error_is_rethrown() {
        let ran = Arc::new(AtomicU32::new(0));
        let ran_clone = Arc::clone(&ran);

        struct CountingHandler(Arc<AtomicU32>);
        #[async_trait]
        impl Invokable for CountingHandler {
            async fn invoke(&self, _results: &Arc<ResultsMap>, _stack: &ContextStack) -> Result<Value, MicroQlError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }

        let mut invokable = test_invokable(Arc::new(FailingService), 0);
        invokable.service_name = "error".to_string();
        invokable.action = "fail".to_string();
        invokable.on_error =
            Some(OnErrorHandler { func: FunctionArg::new(Arc::new(CountingHandler(ran_clone))), is_chain: false });

        let results = Arc::new(ResultsMap::new());
        let stack = ContextStack::empty();
        let err = invokable.invoke(&results, &stack).await.unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("Service failed"));
    }

    #[tokio::test]
    async fn chain_on_error_handler_sees_the_error_at_depth_two() {
        struct DepthCheckingHandler;
        #[async_trait]
        impl Invokable for DepthCheckingHandler {
            async fn invoke(&self, _results: &Arc<ResultsMap>, stack: &ContextStack) -> Result<Value, MicroQlError> {
                // The pre-pushed error sits at depth 2; `call()`'s own push
                // of the same error lands at depth 1.
                assert!(stack.get_at(2).unwrap().to_string().contains("Service failed"));
                Ok(Value::Null)
            }
        }

        let mut invokable = test_invokable(Arc::new(FailingService), 0);
        invokable.service_name = "error".to_string();
        invokable.action = "fail".to_string();
        invokable.on_error =
            Some(OnErrorHandler { func: FunctionArg::new(Arc::new(DepthCheckingHandler)), is_chain: true });

        let results = Arc::new(ResultsMap::new());
        let stack = ContextStack::empty();
        let _ = invokable.invoke(&results, &stack).await.unwrap_err();
    }
}
