// Rewrites JSON Schemas into the OpenAPI subset Gemini's responseSchema accepts

use serde_json::{json, Value};

const GEMINI_UNSUPPORTED_KEYWORDS: [&str; 6] = [
    "additionalProperties",
    "$schema",
    "$id",
    "title",
    "strict",
    "default",
];

pub fn clean_json_schema_for_gemini(value: &Value) -> Value {
    let mut v = value.clone();
    convert_const_to_enum(&mut v);
    flatten_type_arrays(&mut v, false);
    remove_keywords(&mut v, false, &GEMINI_UNSUPPORTED_KEYWORDS);
    v
}

fn convert_const_to_enum(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(constant) = map.remove("const") {
                map.insert("enum".to_string(), json!([constant]));
            }
            for child in map.values_mut() {
                convert_const_to_enum(child);
            }
        }
        Value::Array(arr) => {
            for item in arr {
                convert_const_to_enum(item);
            }
        }
        _ => {}
    }
}

/// `"type": ["string", "null"]` becomes `"type": "string", "nullable": true`
fn flatten_type_arrays(value: &mut Value, in_properties_map: bool) {
    match value {
        Value::Object(map) => {
            if !in_properties_map {
                if let Some(Value::Array(types)) = map.get("type") {
                    let has_null = types.iter().any(|t| t.as_str() == Some("null"));
                    let first_type = types
                        .iter()
                        .filter_map(|t| t.as_str())
                        .find(|t| *t != "null")
                        .unwrap_or("string")
                        .to_string();

                    map.insert("type".to_string(), Value::String(first_type));
                    if has_null {
                        map.insert("nullable".to_string(), Value::Bool(true));
                    }
                }
            }

            for (key, child) in map.iter_mut() {
                let child_in_props = !in_properties_map && key == "properties";
                flatten_type_arrays(child, child_in_props);
            }
        }
        Value::Array(arr) => {
            for item in arr {
                flatten_type_arrays(item, false);
            }
        }
        _ => {}
    }
}

/// Keys of a `properties` map are field names, not keywords, and survive
fn remove_keywords(value: &mut Value, in_properties_map: bool, keywords: &[&str]) {
    match value {
        Value::Object(map) => {
            if !in_properties_map {
                map.retain(|key, _| !keywords.contains(&key.as_str()));
            }

            for (key, child) in map.iter_mut() {
                let child_in_props = !in_properties_map && key == "properties";
                remove_keywords(child, child_in_props, keywords);
            }
        }
        Value::Array(arr) => {
            for item in arr {
                remove_keywords(item, false, keywords);
            }
        }
        _ => {}
    }
}
