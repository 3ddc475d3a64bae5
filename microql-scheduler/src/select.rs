use serde_json::Value;
use std::collections::HashSet;

use microql_core::{MicroQlError, Plan, Select};

/// Apply `plan`'s result-selection rule once `execute` has populated
/// `plan.results` (§4.4 "Result selection").
pub fn select(plan: &Plan) -> Result<Value, MicroQlError> {
    match &plan.select {
        Some(Select::One(name)) => lookup(plan, name),
        Some(Select::Many(names)) => {
            let mut out = serde_json::Map::with_capacity(names.len());
            for name in names {
                out.insert(name.clone(), lookup(plan, name)?);
            }
            Ok(Value::Object(out))
        }
        None => match auto_select_leaf(plan) {
            Some(name) => lookup(plan, &name),
            None => Ok(Value::Object(plan.results.to_map())),
        },
    }
}

fn lookup(plan: &Plan, name: &str) -> Result<Value, MicroQlError> {
    plan.results
        .get(name)
        .ok_or_else(|| MicroQlError::scheduler(format!("select references unknown query '{name}'")))
}

/// The "≥3 queries with exactly one leaf node" auto-select convenience
/// (§4.4, §9), gated by `settings.autoSelect`. A leaf is a query no other
/// query depends on.
fn auto_select_leaf(plan: &Plan) -> Option<String> {
    if !plan.settings.auto_select || plan.nodes.len() < 3 {
        return None;
    }
    let mut referenced: HashSet<&str> = HashSet::new();
    for node in plan.nodes.values() {
        for dep in &node.dependencies {
            referenced.insert(dep.as_str());
        }
    }
    let mut leaves = plan.nodes.keys().filter(|name| !referenced.contains(name.as_str()));
    let first = leaves.next()?.clone();
    if leaves.next().is_some() {
        return None;
    }
    Some(first)
}
