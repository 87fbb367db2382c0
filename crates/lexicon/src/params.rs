//! Query-string parameter codec.
//!
//! On the wire every parameter is a string and arrays are repeated names
//! (`?tag=a&tag=b`).  Decoding coerces each value per the method's declared
//! parameter type; encoding renders booleans as `true`/`false` and drops
//! nulls.

use serde_json::{Map, Number, Value};
use xr_domain::ValidationError;

use crate::model::{MethodDef, SchemaNode};

const LOGGABLE_STRING_CHARS: usize = 100;

/// Decodes raw `(name, value)` pairs for `method`.
///
/// Undeclared names decode as strings.  Coercion failures are reported as
/// [`ValidationError`]s on `parameters.<name>`.
pub fn decode_params(
    method: &MethodDef,
    raw: &[(String, String)],
) -> Result<Map<String, Value>, ValidationError> {
    let mut decoded = Map::new();
    for (name, raw_value) in raw {
        let declared = method
            .parameters
            .as_ref()
            .and_then(|p| p.properties.get(name));
        match declared {
            Some(SchemaNode::Array(array)) => {
                let item = coerce(&array.items, name, raw_value)?;
                let entry = decoded
                    .entry(name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = entry {
                    items.push(item);
                }
            }
            Some(node) => {
                decoded.insert(name.clone(), coerce(node, name, raw_value)?);
            }
            None => {
                decoded.insert(name.clone(), Value::String(raw_value.clone()));
            }
        }
    }
    Ok(decoded)
}

fn coerce(node: &SchemaNode, name: &str, raw: &str) -> Result<Value, ValidationError> {
    let path = format!("parameters.{name}");
    match node {
        SchemaNode::Boolean(_) => match raw {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(ValidationError::new(
                path,
                format!("got {other:?} for boolean parameter {name}, expected true or false"),
            )),
        },
        SchemaNode::Integer(_) => raw
            .parse::<i64>()
            .map(|n| Value::Number(Number::from(n)))
            .map_err(|e| ValidationError::new(path, format!("{e} for integer parameter {name}"))),
        _ => Ok(Value::String(raw.to_string())),
    }
}

/// Encodes parameters as `(name, value)` pairs in map order.
pub fn encode_params(params: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (name, value) in params {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = render(item) {
                        pairs.push((name.clone(), s));
                    }
                }
            }
            other => {
                if let Some(s) = render(other) {
                    pairs.push((name.clone(), s));
                }
            }
        }
    }
    pairs
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// A copy of `value` fit for a log line: `$bytes` blobs become `N bytes`
/// and long strings are cut.
pub fn loggable(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > LOGGABLE_STRING_CHARS => {
            Value::String(s.chars().take(LOGGABLE_STRING_CHARS).collect())
        }
        Value::Object(map) => {
            if let Some(Value::String(b64)) = map.get("$bytes") {
                return Value::String(format!("{} bytes", b64.len() * 3 / 4));
            }
            Value::Object(map.iter().map(|(k, v)| (k.clone(), loggable(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(loggable).collect()),
        other => other.clone(),
    }
}
