use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::MicroQlError;
use crate::node::BoundCallable;

/// How the compiler should treat a declared argument of a service action
/// (§6 "Service contract").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    /// Filled by the MethodForm target (`on: target`).
    On,
    /// Holds a Descriptor or plain-object template; compiled into a callable.
    Function,
    /// Filled with the merged per-call settings object.
    Settings,
}

/// The two optional schema-shaped validators a service may declare per action.
#[derive(Debug, Clone, Default)]
pub struct Validators {
    pub precheck: Option<Value>,
    pub postcheck: Option<Value>,
}

/// One resolved argument value as a service action sees it: either plain
/// JSON data, or — for arguments the service declared `ArgType::Function`
/// on — a compiled callable the service can invoke once per iteration
/// (§9 "Function-typed arguments").
#[derive(Debug, Clone)]
pub enum ArgValue {
    Json(Value),
    Function(BoundCallable),
}

impl ArgValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ArgValue::Json(v) => Some(v),
            ArgValue::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&BoundCallable> {
        match self {
            ArgValue::Function(f) => Some(f),
            ArgValue::Json(_) => None,
        }
    }
}

/// The resolved argument object passed to `Service::call`.
pub type Args = HashMap<String, ArgValue>;

/// Build a plain JSON object from `Args`, for the (common) case of a
/// service that declares no function-typed arguments.
pub fn args_to_json(args: &Args) -> Result<Value, MicroQlError> {
    let mut map = Map::with_capacity(args.len());
    for (k, v) in args {
        match v {
            ArgValue::Json(json) => {
                map.insert(k.clone(), json.clone());
            }
            ArgValue::Function(_) => {
                return Err(MicroQlError::service(format!(
                    "argument '{k}' is a function-typed callable, not a plain value"
                )))
            }
        }
    }
    Ok(Value::Object(map))
}

/// The contract every callable unit implements (§6).
///
/// A service exposes a set of named actions; each action takes a resolved
/// argument object and returns a value (or a structured error). Metadata
/// methods have harmless defaults so a minimal service only needs to
/// implement `actions` and `call`.
#[async_trait]
pub trait Service: Send + Sync {
    /// The action names this service exposes.
    fn actions(&self) -> &[&str];

    /// Invoke `action` with already-resolved `args`.
    async fn call(&self, action: &str, args: Args) -> Result<Value, MicroQlError>;

    /// Declared argument-classification metadata, if any, for `(action, arg)`.
    fn arg_type(&self, _action: &str, _arg: &str) -> Option<ArgType> {
        None
    }

    /// Whether `action` opts out of the outer timeout wrapper by default.
    fn no_timeout(&self, _action: &str) -> bool {
        false
    }

    /// Optional precheck/postcheck schemas for `action`.
    fn validators(&self, _action: &str) -> Option<Validators> {
        None
    }

    /// Called once after `execute()` completes, for every service whose
    /// action was actually invoked (§4.4, §8 "Teardown coverage").
    async fn tear_down(&self) {}
}

impl dyn Service {
    pub fn has_action(&self, action: &str) -> bool {
        self.actions().contains(&action)
    }
}
