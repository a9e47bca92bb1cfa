// JSON Schemas for structured generation and a validator for the subset they use
//
// Supported keywords: type, properties, required, additionalProperties (false),
// items, enum, minimum, maximum, minItems, maxItems.

use once_cell::sync::Lazy;
use serde_json::{json, Value};

use super::GenerationKind;

const MAX_REPORTED_ERRORS: usize = 20;

#[derive(Debug, Clone)]
pub struct SchemaSpec {
    pub name: &'static str,
    pub schema: Value,
}

fn vector(len: usize, minimum: Option<f64>, maximum: Option<f64>) -> Value {
    let mut items = json!({ "type": "number" });
    if let Some(min) = minimum {
        items["minimum"] = json!(min);
    }
    if let Some(max) = maximum {
        items["maximum"] = json!(max);
    }
    json!({ "type": "array", "items": items, "minItems": len, "maxItems": len })
}

static ANIMATION_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["name", "duration", "loop", "keyframes"],
        "properties": {
            "name": { "type": "string" },
            "duration": { "type": "number", "minimum": 0 },
            "loop": { "type": "boolean" },
            "keyframes": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["time", "bone", "rotation", "position", "easing"],
                    "properties": {
                        "time": { "type": "number", "minimum": 0 },
                        "bone": { "type": "string" },
                        "rotation": vector(3, None, None),
                        "position": vector(3, None, None),
                        "easing": {
                            "type": "string",
                            "enum": ["linear", "constant", "cubic", "elastic", "bounce"]
                        }
                    }
                }
            }
        }
    })
});

static VFX_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["name", "emitters"],
        "properties": {
            "name": { "type": "string" },
            "emitters": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["name", "texture", "rate", "lifetime", "speed", "size", "colors"],
                    "properties": {
                        "name": { "type": "string" },
                        "texture": { "type": "string" },
                        "rate": { "type": "number", "minimum": 0 },
                        "lifetime": vector(2, Some(0.0), None),
                        "speed": vector(2, None, None),
                        "size": { "type": "number", "minimum": 0 },
                        "colors": {
                            "type": "array",
                            "minItems": 1,
                            "items": { "type": "string" }
                        }
                    }
                }
            }
        }
    })
});

static SCRIPT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["name", "language", "code", "explanation"],
        "properties": {
            "name": { "type": "string" },
            "language": { "type": "string" },
            "code": { "type": "string" },
            "explanation": { "type": "string" }
        }
    })
});

static UI_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["name", "elements"],
        "properties": {
            "name": { "type": "string" },
            "elements": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["type", "name", "parent", "text", "position", "size"],
                    "properties": {
                        "type": {
                            "type": "string",
                            "enum": [
                                "frame", "text_label", "text_button", "text_box",
                                "image_label", "image_button", "scrolling_frame"
                            ]
                        },
                        "name": { "type": "string" },
                        "parent": { "type": "string" },
                        "text": { "type": "string" },
                        "position": vector(2, Some(0.0), Some(1.0)),
                        "size": vector(2, Some(0.0), Some(1.0))
                    }
                }
            }
        }
    })
});

pub fn schema_for(kind: GenerationKind) -> SchemaSpec {
    let (name, schema) = match kind {
        GenerationKind::Animation => ("animation_clip", &*ANIMATION_SCHEMA),
        GenerationKind::Vfx => ("vfx_effect", &*VFX_SCHEMA),
        GenerationKind::Script => ("script_file", &*SCRIPT_SCHEMA),
        GenerationKind::Ui => ("ui_layout", &*UI_SCHEMA),
    };
    SchemaSpec {
        name,
        schema: schema.clone(),
    }
}

/// Pull the JSON document out of a model reply, tolerating Markdown fences
pub fn extract_json(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();

    let body = if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the info string (```json) and the closing fence
        let rest = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
        rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    };

    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            // Prose around a single object
            match (trimmed.find('{'), trimmed.rfind('}')) {
                (Some(start), Some(end)) if start < end => serde_json::from_str(&trimmed[start..=end])
                    .map_err(|_| format!("reply is not valid JSON: {}", first_err)),
                _ => Err(format!("reply is not valid JSON: {}", first_err)),
            }
        }
    }
}

pub fn parse_and_validate(text: &str, spec: &SchemaSpec) -> Result<Value, Vec<String>> {
    let value = extract_json(text).map_err(|e| vec![e])?;
    let errors = validate(&value, &spec.schema);
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(errors)
    }
}

pub fn validate(value: &Value, schema: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_at(value, schema, "", &mut errors);
    errors.truncate(MAX_REPORTED_ERRORS);
    errors
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(value: &Value, ty: &str) -> bool {
    match ty {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64() || value.is_u64() || value.as_f64().map(|n| n.fract() == 0.0).unwrap_or(false)
        }
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn pointer_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn validate_at(value: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) {
    let at = if path.is_empty() { "/" } else { path };

    if let Some(ty) = schema.get("type") {
        let allowed: Vec<&str> = match ty {
            Value::String(s) => vec![s.as_str()],
            Value::Array(types) => types.iter().filter_map(|t| t.as_str()).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| matches_type(value, t)) {
            errors.push(format!(
                "{}: expected {}, got {}",
                at,
                allowed.join(" or "),
                type_name(value)
            ));
            return;
        }
    }

    if let Some(options) = schema.get("enum").and_then(|e| e.as_array()) {
        if !options.contains(value) {
            errors.push(format!("{}: {} is not an allowed value", at, value));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(|m| m.as_f64()) {
            if n < min {
                errors.push(format!("{}: {} is less than minimum {}", at, n, min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(|m| m.as_f64()) {
            if n > max {
                errors.push(format!("{}: {} is greater than maximum {}", at, n, max));
            }
        }
    }

    match value {
        Value::Object(map) => {
            if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
                for key in required.iter().filter_map(|k| k.as_str()) {
                    if !map.contains_key(key) {
                        errors.push(format!("{}: missing required property \"{}\"", at, key));
                    }
                }
            }

            let properties = schema.get("properties").and_then(|p| p.as_object());
            let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
            for (key, child) in map {
                let child_path = format!("{}/{}", path, pointer_segment(key));
                match properties.and_then(|p| p.get(key)) {
                    Some(child_schema) => validate_at(child, child_schema, &child_path, errors),
                    None if closed => errors.push(format!("{}: unexpected property", child_path)),
                    None => {}
                }
            }
        }
        Value::Array(items) => {
            if let Some(min) = schema.get("minItems").and_then(|m| m.as_u64()) {
                if (items.len() as u64) < min {
                    errors.push(format!("{}: expected at least {} items, got {}", at, min, items.len()));
                }
            }
            if let Some(max) = schema.get("maxItems").and_then(|m| m.as_u64()) {
                if (items.len() as u64) > max {
                    errors.push(format!("{}: expected at most {} items, got {}", at, max, items.len()));
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_at(item, item_schema, &format!("{}/{}", path, i), errors);
                }
            }
        }
        _ => {}
    }
}
