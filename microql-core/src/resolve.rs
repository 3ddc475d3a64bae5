use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::context::ContextStack;
use crate::error::MicroQlError;
use crate::value::{get_path, parse_path, PathSegment};

/// The parse of an anchored reference token (§4.1, §9 "Reference resolver").
enum RefToken {
    /// Bare `$` — a shallow copy of the current results map.
    BareResults,
    /// `$.name[...path]`.
    Dollar { name: String, path: Vec<PathSegment> },
    /// `@`, `@@`, … optionally followed by `.path`.
    At { depth: usize, path: Vec<PathSegment> },
}

fn parse_ref_token(s: &str) -> Option<RefToken> {
    if s == "$" {
        return Some(RefToken::BareResults);
    }
    if let Some(rest) = s.strip_prefix('$') {
        // rest must start with '.', e.g. ".monkey.foo[0]"
        let segments = parse_path(rest)?;
        let mut iter = segments.into_iter();
        let name = match iter.next()? {
            PathSegment::Field(f) => f,
            _ => return None,
        };
        return Some(RefToken::Dollar { name, path: iter.collect() });
    }
    if s.starts_with('@') {
        let depth = s.chars().take_while(|&c| c == '@').count();
        let rest = &s[depth..];
        if rest.is_empty() {
            return Some(RefToken::At { depth, path: Vec::new() });
        }
        let segments = parse_path(rest)?;
        return Some(RefToken::At { depth, path: segments });
    }
    None
}

/// Deep-walk `value`, collecting every query name referenced via `$.name…`.
/// Bare `$` creates no dependency (§4.1, §8 "Bare `$` no-dep").
pub fn collect_dependencies(value: &Value) -> HashSet<String> {
    let mut deps = HashSet::new();
    walk_collect(value, &mut deps);
    deps
}

fn walk_collect(value: &Value, deps: &mut HashSet<String>) {
    match value {
        Value::String(s) => {
            if let Some(RefToken::Dollar { name, .. }) = parse_ref_token(s) {
                deps.insert(name);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_collect(item, deps);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                walk_collect(v, deps);
            }
        }
        _ => {}
    }
}

/// A read-only view over completed query results, used by `resolve`.
pub trait ResultsView {
    fn get(&self, name: &str) -> Option<Value>;
    /// Shallow snapshot of all entries whose key doesn't start with `_`,
    /// for bare `$` (§4.1). Deliberately racy with respect to concurrently
    /// completing peers — see SPEC_FULL.md Open Questions.
    fn snapshot_public(&self) -> Value;
}

/// Resolve every `$`/`@` token in `value` against `(results, stack)`.
/// Objects/arrays are walked structurally; string values are substituted
/// only when the *entire* string matches one of the three anchored forms —
/// partial / mid-string matches are left untouched (§4.1, §9).
pub fn resolve(value: &Value, results: &dyn ResultsView, stack: &ContextStack) -> Result<Value, MicroQlError> {
    match value {
        Value::String(s) => resolve_string(s, results, stack),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve(item, results, stack)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve(v, results, stack)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, results: &dyn ResultsView, stack: &ContextStack) -> Result<Value, MicroQlError> {
    let Some(token) = parse_ref_token(s) else {
        return Ok(Value::String(s.to_string()));
    };
    match token {
        RefToken::BareResults => Ok(results.snapshot_public()),
        RefToken::Dollar { name, path } => {
            let base = results.get(&name).ok_or_else(|| {
                MicroQlError::compile(format!("reference to unresolved query '{name}'"))
            })?;
            Ok(get_path(&base, &path))
        }
        RefToken::At { depth, path } => {
            let base = stack.get_at(depth)?;
            Ok(get_path(base, &path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeResults(HashMap<String, Value>);
    impl ResultsView for FakeResults {
        fn get(&self, name: &str) -> Option<Value> {
            self.0.get(name).cloned()
        }
        fn snapshot_public(&self) -> Value {
            let map: Map<String, Value> = self
                .0
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(map)
        }
    }

    #[test]
    fn collects_dollar_path_dependencies_only() {
        let value = json!({"animal": "$.given.creatureType", "note": "$", "literal": "plain"});
        let deps = collect_dependencies(&value);
        assert_eq!(deps.len(), 1);
        assert!(deps.contains("given"));
    }

    #[test]
    fn resolves_dollar_path() {
        let mut map = HashMap::new();
        map.insert("given".to_string(), json!({"creatureType": "Monkey"}));
        let results = FakeResults(map);
        let stack = ContextStack::empty();
        let resolved = resolve(&json!("$.given.creatureType"), &results, &stack).unwrap();
        assert_eq!(resolved, json!("Monkey"));
    }

    #[test]
    fn resolves_at_depths() {
        let results = FakeResults(HashMap::new());
        let stack = ContextStack::new(vec![json!("bottom"), json!("top")]);
        assert_eq!(resolve(&json!("@"), &results, &stack).unwrap(), json!("top"));
        assert_eq!(resolve(&json!("@@"), &results, &stack).unwrap(), json!("bottom"));
        assert!(resolve(&json!("@@@"), &results, &stack).is_err());
    }

    #[test]
    fn leaves_partial_matches_untouched() {
        let results = FakeResults(HashMap::new());
        let stack = ContextStack::empty();
        assert_eq!(
            resolve(&json!("price: $5"), &results, &stack).unwrap(),
            json!("price: $5")
        );
    }

    #[test]
    fn bare_dollar_excludes_underscore_keys() {
        let mut map = HashMap::new();
        map.insert("visible".to_string(), json!(1));
        map.insert("_hidden".to_string(), json!(2));
        let results = FakeResults(map);
        let stack = ContextStack::empty();
        let resolved = resolve(&json!("$"), &results, &stack).unwrap();
        assert_eq!(resolved, json!({"visible": 1}));
    }
}
