use serde_json::Value;

/// A single segment of a `.path[...]` accessor: either a field name or an
/// array/object index.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
    Key(String),
}

/// Parse a JSONPath-ish suffix (`.field.other[0]["key"]`) into segments.
/// Returns `None` if the suffix is not well-formed; callers treat that as
/// "not an anchored reference" and pass the string through unchanged.
pub fn parse_path(mut s: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    while !s.is_empty() {
        if let Some(rest) = s.strip_prefix('.') {
            let end = rest
                .find(|c: char| c == '.' || c == '[')
                .unwrap_or(rest.len());
            if end == 0 {
                return None;
            }
            segments.push(PathSegment::Field(rest[..end].to_string()));
            s = &rest[end..];
        } else if let Some(rest) = s.strip_prefix('[') {
            let end = rest.find(']')?;
            let inner = &rest[..end];
            if let Ok(idx) = inner.parse::<usize>() {
                segments.push(PathSegment::Index(idx));
            } else {
                let key = inner.trim_matches(|c| c == '"' || c == '\'');
                segments.push(PathSegment::Key(key.to_string()));
            }
            s = &rest[end + 1..];
        } else {
            return None;
        }
    }
    Some(segments)
}

/// Walk `value` along `path`, returning `Value::Null` if any segment misses
/// (matching a dynamic-language host's `undefined` semantics rather than
/// erroring, except for the distinct "context not deep enough" error which
/// is raised earlier, at stack-depth resolution).
pub fn get_path(value: &Value, path: &[PathSegment]) -> Value {
    let mut current = value;
    for seg in path {
        let next = match (seg, current) {
            (PathSegment::Field(name), Value::Object(map)) => map.get(name),
            (PathSegment::Key(name), Value::Object(map)) => map.get(name),
            (PathSegment::Index(i), Value::Array(arr)) => arr.get(*i),
            (PathSegment::Key(name), Value::Array(arr)) => {
                name.parse::<usize>().ok().and_then(|i| arr.get(i))
            }
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// True if `value` is a JSON object (used to distinguish plain-object
/// function-typed template arguments from Descriptor arrays, §4.3 step 4).
pub fn is_plain_object(value: &Value) -> bool {
    matches!(value, Value::Object(_))
}
