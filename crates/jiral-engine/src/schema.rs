//! Argument checks against a tool's declared JSON schema.
//!
//! Covers the subset tool servers actually declare: object shape, required
//! keys, primitive `type`s, `enum`, numeric `minimum`/`maximum` and
//! `additionalProperties: false`. Nested schemas are checked one level deep
//! per property; anything else in the schema is ignored.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required argument '{0}'")]
    MissingRequired(String),
    #[error("argument '{name}' must be of type {expected}")]
    WrongType { name: String, expected: String },
    #[error("argument '{name}' must be one of {allowed}")]
    NotInEnum { name: String, allowed: String },
    #[error("argument '{name}' is out of range ({detail})")]
    OutOfRange { name: String, detail: String },
    #[error("unexpected argument '{0}'")]
    Unexpected(String),
}

/// Check `arguments` against `schema`. Returns the first violation found,
/// scanning required keys before properties.
pub fn validate_arguments(schema: &Value, arguments: &Map<String, Value>) -> Result<(), ValidationError> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(key) || arguments[key].is_null() {
                return Err(ValidationError::MissingRequired(key.to_string()));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);

    for (name, value) in arguments {
        match properties.and_then(|p| p.get(name)) {
            Some(property) => check_property(name, property, value)?,
            None => {
                if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                    return Err(ValidationError::Unexpected(name.clone()));
                }
            }
        }
    }

    Ok(())
}

fn check_property(name: &str, property: &Value, value: &Value) -> Result<(), ValidationError> {
    // Optional arguments sent as null are treated as absent.
    if value.is_null() {
        return Ok(());
    }

    if let Some(expected) = property.get("type") {
        let types: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !types.is_empty() && !types.iter().any(|t| matches_type(t, value)) {
            return Err(ValidationError::WrongType {
                name: name.to_string(),
                expected: types.join(" | "),
            });
        }
    }

    if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let allowed = allowed.iter().map(Value::to_string).collect::<Vec<_>>().join(", ");
            return Err(ValidationError::NotInEnum {
                name: name.to_string(),
                allowed,
            });
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = property.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(ValidationError::OutOfRange {
                    name: name.to_string(),
                    detail: format!("{n} < minimum {min}"),
                });
            }
        }
        if let Some(max) = property.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(ValidationError::OutOfRange {
                    name: name.to_string(),
                    detail: format!("{n} > maximum {max}"),
                });
            }
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type keywords are not ours to reject.
        _ => true,
    }
}
