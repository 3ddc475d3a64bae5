use serde_json::Value;
use std::sync::Arc;

use crate::error::MicroQlError;

/// The nested context stack addressed from the top (§4.2).
///
/// `extend` never aliases the prior storage: the underlying `Vec` is cloned
/// on push, so two branches that each `extend` the same parent stack can
/// never observe each other's top.
#[derive(Debug, Clone, Default)]
pub struct ContextStack {
    // index 0 is the bottom of the stack; the *last* element is depth 1.
    levels: Arc<Vec<Value>>,
}

impl ContextStack {
    pub fn new(initial: Vec<Value>) -> Self {
        ContextStack { levels: Arc::new(initial) }
    }

    pub fn empty() -> Self {
        ContextStack { levels: Arc::new(Vec::new()) }
    }

    /// Depth is 1-based, counted from the top.
    pub fn get_at(&self, depth: usize) -> Result<&Value, MicroQlError> {
        if depth == 0 || depth > self.levels.len() {
            return Err(MicroQlError::compile(format!(
                "@{} not available — context not deep enough",
                "@".repeat(depth.max(1))
            )));
        }
        let idx = self.levels.len() - depth;
        Ok(&self.levels[idx])
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Returns a *new* stack with `value` pushed on top. Does not mutate `self`.
    pub fn extend(&self, value: Value) -> ContextStack {
        let mut next = (*self.levels).clone();
        next.push(value);
        ContextStack { levels: Arc::new(next) }
    }

    /// Replace the current top in place (used while stepping a chain: each
    /// step's return value becomes the new top for the next step).
    pub fn set_top(&mut self, value: Value) {
        let mut next = (*self.levels).clone();
        if let Some(last) = next.last_mut() {
            *last = value;
        } else {
            next.push(value);
        }
        self.levels = Arc::new(next);
    }

    pub fn current_top(&self) -> Option<&Value> {
        self.levels.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_at_depth_one_is_top() {
        let stack = ContextStack::new(vec![json!(1), json!(2), json!(3)]);
        assert_eq!(stack.get_at(1).unwrap(), &json!(3));
        assert_eq!(stack.get_at(2).unwrap(), &json!(2));
        assert_eq!(stack.get_at(3).unwrap(), &json!(1));
    }

    #[test]
    fn get_at_out_of_range_errors() {
        let stack = ContextStack::new(vec![json!(1)]);
        let err = stack.get_at(2).unwrap_err();
        assert!(err.to_string().contains("not available"));
    }

    #[test]
    fn extend_does_not_alias_prior_storage() {
        let base = ContextStack::new(vec![json!("base")]);
        let child_a = base.extend(json!("a"));
        let child_b = base.extend(json!("b"));
        assert_eq!(child_a.get_at(1).unwrap(), &json!("a"));
        assert_eq!(child_b.get_at(1).unwrap(), &json!("b"));
        // Mutating one child's top must not affect the other or the parent.
        let mut child_a = child_a;
        child_a.set_top(json!("mutated"));
        assert_eq!(child_b.get_at(1).unwrap(), &json!("b"));
        assert_eq!(base.get_at(1).unwrap(), &json!("base"));
    }

    #[test]
    fn set_top_replaces_only_the_top() {
        let mut stack = ContextStack::new(vec![json!("bottom"), json!("top")]);
        stack.set_top(json!("new-top"));
        assert_eq!(stack.get_at(1).unwrap(), &json!("new-top"));
        assert_eq!(stack.get_at(2).unwrap(), &json!("bottom"));
    }
}
