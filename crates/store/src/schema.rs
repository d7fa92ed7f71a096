//! Structural JSON-schema checks for registered event types.
//!
//! Covers the subset the registry relies on — `type`, `required`,
//! `properties`, `items`, `enum` — with per-path errors. A full JSON-Schema
//! validation library is an external collaborator; this sits behind that
//! seam so payload validation stays deterministic and dependency-free.

use serde_json::Value as JsonValue;

const KNOWN_TYPES: &[&str] = &[
    "object", "array", "string", "number", "integer", "boolean", "null",
];

/// Check that `schema` itself is well-formed. Unknown keywords are allowed;
/// known keywords must have the right shape.
pub fn check_schema(schema: &JsonValue) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    check_schema_at(schema, "$", &mut errors);
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check_schema_at(schema: &JsonValue, path: &str, errors: &mut Vec<String>) {
    let Some(obj) = schema.as_object() else {
        errors.push(format!("{path}: schema must be an object"));
        return;
    };

    if let Some(ty) = obj.get("type") {
        match ty {
            JsonValue::String(s) => {
                if !KNOWN_TYPES.contains(&s.as_str()) {
                    errors.push(format!("{path}.type: unknown type '{s}'"));
                }
            }
            JsonValue::Array(list) => {
                for (i, item) in list.iter().enumerate() {
                    match item.as_str() {
                        Some(s) if KNOWN_TYPES.contains(&s) => {}
                        _ => errors.push(format!("{path}.type[{i}]: unknown type")),
                    }
                }
            }
            _ => errors.push(format!("{path}.type: must be a string or array of strings")),
        }
    }

    if let Some(required) = obj.get("required") {
        match required.as_array() {
            Some(list) => {
                for (i, item) in list.iter().enumerate() {
                    if !item.is_string() {
                        errors.push(format!("{path}.required[{i}]: must be a string"));
                    }
                }
            }
            None => errors.push(format!("{path}.required: must be an array")),
        }
    }

    if let Some(properties) = obj.get("properties") {
        match properties.as_object() {
            Some(props) => {
                for (name, sub) in props {
                    check_schema_at(sub, &format!("{path}.properties.{name}"), errors);
                }
            }
            None => errors.push(format!("{path}.properties: must be an object")),
        }
    }

    if let Some(items) = obj.get("items") {
        check_schema_at(items, &format!("{path}.items"), errors);
    }

    if let Some(en) = obj.get("enum") {
        if !en.is_array() {
            errors.push(format!("{path}.enum: must be an array"));
        }
    }
}

/// Validate `data` against `schema`. Returns per-path errors, empty on pass.
pub fn validate(schema: &JsonValue, data: &JsonValue) -> Vec<String> {
    let mut errors = Vec::new();
    validate_at(schema, data, "$", &mut errors);
    errors
}

fn validate_at(schema: &JsonValue, data: &JsonValue, path: &str, errors: &mut Vec<String>) {
    let Some(obj) = schema.as_object() else {
        return;
    };

    if let Some(ty) = obj.get("type") {
        let allowed: Vec<&str> = match ty {
            JsonValue::String(s) => vec![s.as_str()],
            JsonValue::Array(list) => list.iter().filter_map(|v| v.as_str()).collect(),
            _ => vec![],
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, data)) {
            errors.push(format!(
                "{path}: expected {}, got {}",
                allowed.join(" or "),
                type_name(data)
            ));
            return;
        }
    }

    if let Some(en) = obj.get("enum").and_then(|e| e.as_array()) {
        if !en.contains(data) {
            errors.push(format!("{path}: value not in enum"));
        }
    }

    if let Some(data_obj) = data.as_object() {
        if let Some(required) = obj.get("required").and_then(|r| r.as_array()) {
            for name in required.iter().filter_map(|v| v.as_str()) {
                if !data_obj.contains_key(name) {
                    errors.push(format!("{path}.{name}: required property missing"));
                }
            }
        }
        if let Some(props) = obj.get("properties").and_then(|p| p.as_object()) {
            for (name, sub) in props {
                if let Some(value) = data_obj.get(name) {
                    validate_at(sub, value, &format!("{path}.{name}"), errors);
                }
            }
        }
    }

    if let (Some(items), Some(list)) = (obj.get("items"), data.as_array()) {
        for (i, item) in list.iter().enumerate() {
            validate_at(items, item, &format!("{path}[{i}]"), errors);
        }
    }
}

fn type_matches(ty: &str, value: &JsonValue) -> bool {
    match ty {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
