//! MicroQL — a declarative query/service orchestration engine.
//!
//! Given a JSON config naming a set of *services* and a set of *queries*
//! (named service invocations with `$`/`@`-referenced arguments), `query`
//! compiles the config into a dependency graph, runs it wave-by-wave to
//! completion, and returns either one query's result or the whole results
//! map (§4.7). This facade crate ties together `microql-core` (compiler,
//! reference resolver, wrapper pipeline), `microql-scheduler` (wave-parallel
//! executor and result selection), and `microql-utils` (the built-in `util`
//! service) behind a single entry point.
//!
//! ```ignore
//! use microql::prelude::*;
//!
//! let mut services: ServiceRegistry = ServiceRegistry::new();
//! services.insert("fieldAgent".to_string(), Arc::new(FieldAgentService));
//! let out = microql::query(config, services).await?;
//! ```

use std::sync::Arc;

use serde_json::Value;

use microql_core::{compile, Config, MicroQlError, ServiceRegistry, Snapshot};
use microql_utils::UtilService;

/// The name every default `util` service is registered under, and the
/// service name an application must use if it wants to supply its own
/// table instead (§4.9).
const DEFAULT_UTIL_SERVICE: &str = "util";

/// Compile and run `config` against `services`, returning the selected
/// result (§4.7).
///
/// The built-in `util` service (§4.9) is registered under `"util"`
/// automatically unless `services` already names one — an application that
/// wants a custom `util` table (e.g. a different snapshot path) supplies it
/// itself and this step is a no-op.
///
/// If `config.snapshot` names a file, it is loaded first and its recorded
/// results are seeded into the plan before execution, so queries it already
/// completed are never re-invoked (§4.8 "resume"). Once the run finishes —
/// successfully or not — the full results map, now including whatever
/// queries freshly ran, is written back to that same path, so a later call
/// against the same config continues where this one left off.
pub async fn query(config: Config, mut services: ServiceRegistry) -> Result<Value, MicroQlError> {
    let util = Arc::new(UtilService::new(None));
    services.entry(DEFAULT_UTIL_SERVICE.to_string()).or_insert_with(|| util.clone() as Arc<dyn microql_core::Service>);

    let snapshot_path = config.snapshot.clone();
    let plan = compile(&config, services)?;
    util.bind_results(Arc::clone(&plan.results));

    if let Some(path) = &snapshot_path {
        if let Ok(snapshot) = Snapshot::load(path) {
            for (name, value) in snapshot.results {
                plan.results.insert(name, value);
            }
        }
    }

    let outcome = microql_scheduler::run(&plan).await;

    if let Some(path) = &snapshot_path {
        let snapshot = Snapshot::new(current_timestamp(), plan.results.to_map());
        if let Err(e) = snapshot.save(path) {
            tracing::warn!(path = %path, error = %e, "failed to write snapshot");
        }
    }

    outcome
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Unified prelude — `use microql::prelude::*` pulls in the types most
/// callers need to build a `ServiceRegistry` and run a query.
pub mod prelude {
    pub use microql_core::{
        compile, Args, ArgType, ArgValue, Config, ContextStack, MicroQlError, MicroQlResult, Plan, Select, Service,
        ServiceRegistry, Snapshot,
    };
    pub use microql_utils::UtilService;

    pub use crate::query;
}
