use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::context::ContextStack;
use crate::error::MicroQlError;
use crate::results::ResultsMap;
use crate::settings::CallSettings;

/// Anything that can be invoked against the shared results map and a
/// context stack to produce a value — the compiled form of a Descriptor
/// once the wrapper pipeline (§4.5) has been wound around its service call.
///
/// Takes `results` by shared `Arc` (not `&ResultsMap`) so a callable can
/// cheaply capture its own copy when binding itself to a particular call
/// site (see `BoundCallable`).
#[async_trait]
pub trait Invokable: Send + Sync {
    async fn invoke(&self, results: &Arc<ResultsMap>, stack: &ContextStack) -> Result<Value, MicroQlError>;
}

/// A compiled function-typed argument (§9 "Function-typed arguments").
///
/// Holds only the compiled sub-graph — `bind` closes over a specific
/// results map and context stack at the call site that received it, turning
/// it into a self-contained `BoundCallable` a service can invoke without
/// needing to see the engine's internals.
#[derive(Clone)]
pub struct FunctionArg {
    inner: Arc<dyn Invokable>,
}

impl FunctionArg {
    pub fn new(inner: Arc<dyn Invokable>) -> Self {
        FunctionArg { inner }
    }

    pub fn bind(&self, results: Arc<ResultsMap>, stack: ContextStack) -> BoundCallable {
        BoundCallable { inner: Arc::clone(&self.inner), results, stack }
    }
}

impl fmt::Debug for FunctionArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FunctionArg(..)")
    }
}

/// A function-typed argument bound to the results map and context stack of
/// the call that received it — what a service action actually sees and
/// invokes (once per item, for `map`/`filter`/`reduce`, §4.9).
#[derive(Clone)]
pub struct BoundCallable {
    inner: Arc<dyn Invokable>,
    results: Arc<ResultsMap>,
    stack: ContextStack,
}

impl BoundCallable {
    /// Push `ctx_value` onto the bound stack and evaluate the closed-over
    /// sub-graph — the pushed value is visible only for this one call.
    pub async fn call(&self, ctx_value: Value) -> Result<Value, MicroQlError> {
        let extended = self.stack.extend(ctx_value);
        self.inner.invoke(&self.results, &extended).await
    }
}

impl fmt::Debug for BoundCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoundCallable(..)")
    }
}

/// One compiled argument slot (§4.3 step "argument classification").
#[derive(Debug, Clone)]
pub enum CompiledArg {
    /// Plain data, possibly still holding unresolved `$`/`@` tokens that
    /// `withArgs` resolves against the live results map at call time.
    Plain(Value),
    /// A compiled callable for an argument the service declared `Function` on.
    Function(FunctionArg),
    /// Marker: inject this call's merged `CallSettings` (as JSON) in place.
    Settings,
}

pub type CompiledArgs = HashMap<String, CompiledArg>;

/// One compiled `ServiceCall` — a single `(service, action)` invocation with
/// its already-classified argument map and merged settings (§3, §6).
pub struct ServiceNode {
    pub service_name: String,
    pub action: String,
    pub args: CompiledArgs,
    pub settings: CallSettings,
    /// The fully wound wrapper pipeline: withArgs → withDebug →
    /// withErrorHandling → withRetry → withTimeout → the service call itself.
    pub invoke: Arc<dyn Invokable>,
}

impl fmt::Debug for ServiceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceNode")
            .field("service_name", &self.service_name)
            .field("action", &self.action)
            .field("args", &self.args)
            .finish()
    }
}

#[async_trait]
impl Invokable for ServiceNode {
    async fn invoke(&self, results: &Arc<ResultsMap>, stack: &ContextStack) -> Result<Value, MicroQlError> {
        self.invoke.invoke(results, stack).await
    }
}

/// A compiled Chain — an ordered sequence of ServiceNode steps that share
/// one context stack, each step's result becoming the next step's `@` (§4.6).
pub struct ChainNode {
    pub steps: Vec<ServiceNode>,
}

impl fmt::Debug for ChainNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainNode").field("steps", &self.steps.len()).finish()
    }
}

#[async_trait]
impl Invokable for ChainNode {
    /// Runs each step in order on one shared stack, replacing the top with
    /// the previous step's result before the next step runs (§4.6).
    async fn invoke(&self, results: &Arc<ResultsMap>, stack: &ContextStack) -> Result<Value, MicroQlError> {
        let mut current = stack.clone();
        let mut last = Value::Null;
        for (i, step) in self.steps.iter().enumerate() {
            last = step.invoke(results, &current).await?;
            if i + 1 < self.steps.len() {
                current = current.extend(last.clone());
            }
        }
        Ok(last)
    }
}

/// A compiled Alias — a `$.query` reference resolved once its target query
/// has completed (§3 "Alias").
#[derive(Debug, Clone)]
pub struct AliasNode {
    pub target: String,
}

#[async_trait]
impl Invokable for AliasNode {
    async fn invoke(&self, results: &Arc<ResultsMap>, _stack: &ContextStack) -> Result<Value, MicroQlError> {
        results.get(&self.target).ok_or_else(|| {
            MicroQlError::compile(format!("reference to unresolved query '{}'", self.target))
        })
    }
}

/// Wraps a plain-object/array template rather than a service call — the
/// other shape a function-typed argument may take (§9). Evaluated by
/// structurally resolving its `$`/`@` tokens against the live results map
/// and context stack on every call.
#[derive(Debug, Clone)]
pub struct TemplateInvokable(pub Value);

#[async_trait]
impl Invokable for TemplateInvokable {
    async fn invoke(&self, results: &Arc<ResultsMap>, stack: &ContextStack) -> Result<Value, MicroQlError> {
        crate::resolve::resolve(&self.0, results.as_ref(), stack)
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Service(ServiceNode),
    Chain(ChainNode),
    Alias(AliasNode),
    /// A literal value with no dependencies and nothing left to invoke.
    Resolved(Value),
}

/// One compiled top-level query (§3 "Node").
#[derive(Debug)]
pub struct Node {
    pub query_name: String,
    pub dependencies: HashSet<String>,
    pub kind: NodeKind,
}

#[async_trait]
impl Invokable for Node {
    async fn invoke(&self, results: &Arc<ResultsMap>, stack: &ContextStack) -> Result<Value, MicroQlError> {
        match &self.kind {
            NodeKind::Service(s) => s.invoke(results, stack).await,
            NodeKind::Chain(c) => c.invoke(results, stack).await,
            NodeKind::Alias(a) => a.invoke(results, stack).await,
            NodeKind::Resolved(v) => Ok(v.clone()),
        }
    }
}
