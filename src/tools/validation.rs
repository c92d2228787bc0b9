//! Check function call arguments against a tool's declared schema.
//!
//! Only the top level of an object schema is checked: required keys, property
//! types and string enums. Nested schemas are the tool's own business.

use serde_json::Value;

use crate::error::ToolError;
use crate::types::FunctionArgs;

/// Validate `args` against `schema`, reporting the first violation.
pub fn validate_arguments(args: &FunctionArgs, schema: &Value) -> Result<(), ToolError> {
    if let Some(schema_type) = schema.get("type").and_then(Value::as_str) {
        if schema_type != "object" {
            return Err(invalid(format!(
                "tool schema must describe an object, found '{schema_type}'"
            )));
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        if let Some(name) = required
            .iter()
            .filter_map(Value::as_str)
            .find(|name| !args.contains_key(*name))
        {
            return Err(invalid(format!("missing required field '{name}'")));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in args {
        let Some(property) = properties.get(key) else {
            continue;
        };
        if let Some(expected) = property.get("type").and_then(Value::as_str) {
            if !value_matches_type(value, expected) {
                return Err(invalid(format!(
                    "field '{key}' expected type '{expected}', got {}",
                    json_type_name(value)
                )));
            }
        }
        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(invalid(format!("field '{key}' must be one of {}", Value::Array(allowed.clone()))));
            }
        }
    }

    Ok(())
}

fn invalid(message: String) -> ToolError {
    ToolError::InvalidArguments(message)
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
