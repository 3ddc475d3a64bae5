use serde_json::{Map, Value};

use crate::error::MicroQlError;

/// The canonical (post-MethodForm-rewrite) descriptor shape (§3, §4.3 step 1).
///
/// `Descriptor::parse` accepts both `ServiceCall` (`[service, action, args?]`)
/// and `MethodForm` (`[target, "service:action", args?]`) array shapes and
/// always returns a canonicalized `ServiceCall` — MethodForm is rewritten by
/// inserting the target under the `on` argument key, per the original spec.
#[derive(Debug, Clone)]
pub enum Descriptor {
    ServiceCall { service: String, action: String, args: Map<String, Value> },
    /// An ordered sequence of ServiceCall steps sharing one context stack.
    Chain { steps: Vec<Descriptor> },
    /// A `$.query` string referencing another top-level query's result.
    Alias { target: String },
}

impl Descriptor {
    /// Parse a raw `serde_json::Value` into a `Descriptor` (§3 "Descriptor").
    pub fn parse(value: &Value) -> Result<Descriptor, MicroQlError> {
        match value {
            Value::String(s) => {
                let target = s.strip_prefix("$.").ok_or_else(|| {
                    MicroQlError::compile(format!(
                        "string descriptor '{s}' is not a valid $.query alias"
                    ))
                })?;
                Ok(Descriptor::Alias { target: target.to_string() })
            }
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(MicroQlError::compile("empty descriptor array"));
                }
                if matches!(items[0], Value::Array(_)) {
                    let steps = items
                        .iter()
                        .map(Descriptor::parse_call)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Descriptor::Chain { steps })
                } else {
                    Descriptor::parse_call(value)
                }
            }
            other => Err(MicroQlError::compile(format!("invalid descriptor shape: {other}"))),
        }
    }

    /// Parse one `[service, action, args?]` / `[target, "service:action", args?]`
    /// array — used both for a top-level single-call query and for each step
    /// of a chain.
    fn parse_call(value: &Value) -> Result<Descriptor, MicroQlError> {
        let items = value
            .as_array()
            .ok_or_else(|| MicroQlError::compile("expected a [service, action, args?] array"))?;
        if items.len() < 2 || items.len() > 3 {
            return Err(MicroQlError::compile("descriptor array must have 2 or 3 elements"));
        }
        let second = items[1]
            .as_str()
            .ok_or_else(|| MicroQlError::compile("descriptor[1] must be a string"))?;
        let mut args = match items.get(2) {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => return Err(MicroQlError::compile("descriptor args must be an object")),
        };

        if let Some((service, action)) = second.split_once(':') {
            // MethodForm — canonicalize by inserting the target under `on`.
            args.insert("on".to_string(), items[0].clone());
            Ok(Descriptor::ServiceCall { service: service.to_string(), action: action.to_string(), args })
        } else {
            let service = items[0]
                .as_str()
                .ok_or_else(|| MicroQlError::compile("descriptor[0] must be a string"))?
                .to_string();
            Ok(Descriptor::ServiceCall { service, action: second.to_string(), args })
        }
    }
}
