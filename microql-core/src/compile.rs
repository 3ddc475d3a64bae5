use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use microql_cache::{CacheStore, DiskStore};
use microql_rate_limit::RateLimiter;

use crate::config::{Config, Select};
use crate::descriptor::Descriptor;
use crate::error::MicroQlError;
use crate::node::{
    AliasNode, ChainNode, CompiledArg, CompiledArgs, FunctionArg, Invokable, Node, NodeKind,
    ServiceNode, TemplateInvokable,
};
use crate::resolve::collect_dependencies;
use crate::results::ResultsMap;
use crate::service::{ArgType, Service};
use crate::settings::{is_reserved_key, merge_settings, GlobalSettings};
use crate::wrap::{OnErrorHandler, ServiceInvokable};

pub type ServiceRegistry = HashMap<String, Arc<dyn Service>>;

/// Per-`Plan` engine state shared read-only across every compiled node: the
/// rate limiter and (optional) cache store. Constructed fresh per `compile`
/// call — never a process-wide singleton (§9 "no global mutable state").
struct Env<'a> {
    services: &'a ServiceRegistry,
    global: &'a GlobalSettings,
    rate_limiter: Arc<RateLimiter>,
    cache: Option<Arc<dyn CacheStore>>,
}

/// A fully compiled, ready-to-run config (§3 "Plan").
pub struct Plan {
    pub nodes: HashMap<String, Arc<Node>>,
    /// Query names grouped into dependency waves, each wave schedulable
    /// concurrently once every prior wave has completed (§4.4).
    pub waves: Vec<Vec<String>>,
    pub results: Arc<ResultsMap>,
    /// Service names directly referenced by a top-level Service/Chain node.
    /// Best-effort — see DESIGN.md; teardown iterates the full registry
    /// rather than relying on this set, since function-typed arguments can
    /// reach services this doesn't see.
    pub used_services: HashSet<String>,
    pub services: ServiceRegistry,
    pub settings: GlobalSettings,
    /// `config.select`, carried through so a scheduler can apply result
    /// selection without needing the original `Config` kept around.
    pub select: Option<Select>,
    /// The rate limiter shared by every compiled node (§4.6).
    pub rate_limiter: Arc<RateLimiter>,
    /// The cache store shared by every compiled node, present whenever
    /// `settings.cache.configDir` is set (§4.6).
    pub cache: Option<Arc<dyn CacheStore>>,
}

/// Compile `config` against `services` into an executable `Plan` (§4.3).
///
/// A `RateLimiter` and, if `settings.cache` names a `configDir`, a disk-backed
/// `CacheStore` are constructed fresh for this `Plan` and shared by every
/// compiled node — callers who want to share a cache or rate limiter across
/// multiple `compile` calls should keep their own `Plan`s alive rather than
/// recompiling, since neither is exposed as a process-wide singleton.
pub fn compile(config: &Config, services: ServiceRegistry) -> Result<Plan, MicroQlError> {
    let global = &config.settings;

    let results = Arc::new(ResultsMap::new());
    results.insert("given".to_string(), config.given.clone());

    let rate_limiter = Arc::new(RateLimiter::new());
    let cache: Option<Arc<dyn CacheStore>> =
        global.cache.as_ref().map(|c| Arc::new(DiskStore::new(c.config_dir.clone())) as Arc<dyn CacheStore>);

    let env = Env { services: &services, global, rate_limiter: Arc::clone(&rate_limiter), cache: cache.clone() };

    let mut nodes: HashMap<String, Arc<Node>> = HashMap::new();
    let mut used_services = HashSet::new();

    for (name, raw) in &config.queries {
        if name == "given" {
            return Err(MicroQlError::compile("'given' is reserved and cannot be used as a query name"));
        }
        let node = compile_node(name, raw, &env)?;
        collect_used_services(&node, &mut used_services);
        nodes.insert(name.clone(), Arc::new(node));
    }

    let waves = schedule_waves(&nodes)?;

    Ok(Plan {
        nodes,
        waves,
        results,
        used_services,
        services,
        settings: global.clone(),
        select: config.select.clone(),
        rate_limiter,
        cache,
    })
}

fn collect_used_services(node: &Node, used: &mut HashSet<String>) {
    match &node.kind {
        NodeKind::Service(s) => {
            used.insert(s.service_name.clone());
        }
        NodeKind::Chain(c) => {
            for step in &c.steps {
                used.insert(step.service_name.clone());
            }
        }
        NodeKind::Alias(_) | NodeKind::Resolved(_) => {}
    }
}

/// Compile one top-level query's raw descriptor JSON into a `Node`.
fn compile_node(name: &str, raw: &Value, env: &Env<'_>) -> Result<Node, MicroQlError> {
    let dependencies = collect_dependencies(raw);
    let descriptor = Descriptor::parse(raw)?;
    let kind = match descriptor {
        Descriptor::ServiceCall { service, action, args } => {
            NodeKind::Service(build_service_node(name, service, action, args, env)?)
        }
        Descriptor::Chain { steps } => NodeKind::Chain(build_chain_node(name, steps, env)?),
        Descriptor::Alias { target } => NodeKind::Alias(AliasNode { target }),
    };
    Ok(Node { query_name: name.to_string(), dependencies, kind })
}

fn build_chain_node(name: &str, steps: Vec<Descriptor>, env: &Env<'_>) -> Result<ChainNode, MicroQlError> {
    let mut compiled_steps = Vec::with_capacity(steps.len());
    for (i, step) in steps.into_iter().enumerate() {
        match step {
            Descriptor::ServiceCall { service, action, args } => {
                let step_name = format!("{name}[{}]", i + 1);
                compiled_steps.push(build_service_node(&step_name, service, action, args, env)?);
            }
            _ => return Err(MicroQlError::compile("chain steps must be ServiceCall descriptors")),
        }
    }
    Ok(ChainNode { steps: compiled_steps })
}

/// Build one `ServiceCall` into a `ServiceNode`: look up the service,
/// classify its arguments, merge settings, and wind the wrapper pipeline.
fn build_service_node(
    query_name: &str,
    service_name: String,
    action: String,
    args_map: Map<String, Value>,
    env: &Env<'_>,
) -> Result<ServiceNode, MicroQlError> {
    let service = env
        .services
        .get(&service_name)
        .cloned()
        .ok_or_else(|| MicroQlError::compile(format!("unknown service '{service_name}'")))?;
    if !service.has_action(&action) {
        return Err(MicroQlError::compile(format!(
            "service '{service_name}' has no action '{action}'"
        )));
    }

    let mut reserved = Map::new();
    let mut plain_args = Map::new();
    for (key, value) in args_map {
        if is_reserved_key(&key) {
            reserved.insert(key, value);
        } else {
            plain_args.insert(key, value);
        }
    }

    let no_timeout_default = service.no_timeout(&action);
    let settings = merge_settings(env.global, None, &reserved, no_timeout_default)?;

    let mut compiled = CompiledArgs::new();
    for (key, value) in plain_args {
        match service.arg_type(&action, &key) {
            Some(ArgType::Function) => {
                let func = compile_function_arg(query_name, &value, env)?;
                compiled.insert(key, CompiledArg::Function(func));
            }
            Some(ArgType::Settings) => {
                compiled.insert(key, CompiledArg::Settings);
            }
            Some(ArgType::On) | None => {
                compiled.insert(key, CompiledArg::Plain(value));
            }
        }
    }

    let rate_limit_ms = env.global.rate_limit.get(&service_name).copied();

    // Compile `onError` into an actual Invokable (ServiceCall or Chain) the
    // same way a function-typed argument is compiled, rather than leaving it
    // as raw data resolved structurally (§4.5 item 3, §8 scenario 6).
    let on_error = match &settings.on_error {
        Some(value) => {
            let is_chain = matches!(Descriptor::parse(value), Ok(Descriptor::Chain { .. }));
            let func = compile_function_arg(query_name, value, env)?;
            Some(OnErrorHandler { func, is_chain })
        }
        None => None,
    };

    let invoke: Arc<dyn Invokable> = Arc::new(ServiceInvokable {
        service: Arc::clone(&service),
        query_name: query_name.to_string(),
        service_name: service_name.clone(),
        action: action.clone(),
        args: compiled.clone(),
        settings: settings.clone(),
        on_error,
        rate_limiter: Arc::clone(&env.rate_limiter),
        rate_limit_ms,
        cache: env.cache.clone(),
    });

    Ok(ServiceNode { service_name, action, args: compiled, settings, invoke })
}

/// Compile a function-typed argument value (§9) — either a Descriptor
/// (ServiceCall/Chain/Alias) closed over its own sub-graph, or a plain
/// object rewritten to `[util, template, value]` and compiled like any
/// other ServiceCall (§4.3 step 4). A non-object fallback (an array or
/// scalar, which `util:template`'s args-map shape can't carry) is instead
/// evaluated in place by structural `$`/`@` substitution.
fn compile_function_arg(query_name: &str, value: &Value, env: &Env<'_>) -> Result<FunctionArg, MicroQlError> {
    match Descriptor::parse(value) {
        Ok(descriptor) => {
            let invokable = compile_invokable(query_name, descriptor, env)?;
            Ok(FunctionArg::new(invokable))
        }
        Err(_) => match value {
            Value::Object(map) => {
                let node =
                    build_service_node(query_name, "util".to_string(), "template".to_string(), map.clone(), env)?;
                Ok(FunctionArg::new(Arc::new(node)))
            }
            other => Ok(FunctionArg::new(Arc::new(TemplateInvokable(other.clone())))),
        },
    }
}

fn compile_invokable(query_name: &str, descriptor: Descriptor, env: &Env<'_>) -> Result<Arc<dyn Invokable>, MicroQlError> {
    match descriptor {
        Descriptor::ServiceCall { service, action, args } => {
            Ok(Arc::new(build_service_node(query_name, service, action, args, env)?))
        }
        Descriptor::Chain { steps } => Ok(Arc::new(build_chain_node(query_name, steps, env)?)),
        Descriptor::Alias { target } => Ok(Arc::new(AliasNode { target })),
    }
}

/// Group query names into dependency waves via Kahn's algorithm, rejecting
/// unknown references and circular dependencies (§4.4, §8 "cycle rejected").
fn schedule_waves(nodes: &HashMap<String, Arc<Node>>) -> Result<Vec<Vec<String>>, MicroQlError> {
    let mut remaining: HashMap<String, HashSet<String>> = HashMap::with_capacity(nodes.len());
    for (name, node) in nodes {
        let mut deps = HashSet::new();
        for dep in &node.dependencies {
            if dep == "given" {
                continue;
            }
            if !nodes.contains_key(dep) {
                return Err(MicroQlError::compile(format!(
                    "query '{name}' references unknown query '{dep}'"
                )));
            }
            deps.insert(dep.clone());
        }
        remaining.insert(name.clone(), deps);
    }

    let mut waves = Vec::new();
    while !remaining.is_empty() {
        let mut ready: Vec<String> =
            remaining.iter().filter(|(_, deps)| deps.is_empty()).map(|(n, _)| n.clone()).collect();
        if ready.is_empty() {
            let mut stuck: Vec<String> = remaining.keys().cloned().collect();
            stuck.sort();
            return Err(MicroQlError::compile(format!(
                "circular dependency among queries: {}",
                stuck.join(", ")
            )));
        }
        ready.sort();
        for name in &ready {
            remaining.remove(name);
        }
        for deps in remaining.values_mut() {
            for name in &ready {
                deps.remove(name);
            }
        }
        waves.push(ready);
    }
    Ok(waves)
}
