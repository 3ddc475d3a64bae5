use serde_json::Value;

use crate::error::MicroQlError;

/// Validate `value` against a precheck/postcheck schema (§4.9 "Schema
/// validator"). Schemas are plain JSON Schema documents; validation errors
/// are joined into one message so the surrounding wrapper can attach a
/// single `Validation` error.
pub fn validate_against_schema(value: &Value, schema: &Value) -> Result<(), MicroQlError> {
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| MicroQlError::compile(format!("invalid schema: {e}")))?;
    let result = compiled.validate(value);
    if let Err(errors) = result {
        let joined = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        return Err(MicroQlError::validation(joined));
    }
    Ok(())
}
