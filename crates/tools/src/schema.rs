//! Argument validation against a tool's declared input schema.
//!
//! Tool servers publish JSON Schema for their inputs. Formats are asserted,
//! so `"format": "date-time"` rejects strings that are not RFC 3339.

use serde_json::Value;
use tracing::warn;

/// Validate `value` against `schema`, returning every violation found.
///
/// Each violation is `"<json-pointer>: <message>"`; the root is `/`.
/// A schema that does not compile is skipped with a warning rather than
/// rejecting every call to the tool.
pub fn validate(schema: &Value, value: &Value) -> Vec<String> {
    let validator = match jsonschema::options()
        .should_validate_formats(true)
        .build(schema)
    {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Invalid tool schema, skipping validation");
            return Vec::new();
        }
    };

    validator
        .iter_errors(value)
        .map(|e| {
            let path = e.instance_path.to_string();
            let path = if path.is_empty() { "/".to_string() } else { path };
            format!("{path}: {e}")
        })
        .collect()
}
