//! Schema-driven JSON encoding for REST request bodies.
//!
//! Endpoint field tables map field names to a [`FieldType`] descriptor. The
//! encoder walks an input object and emits only the fields the table names,
//! coerced per descriptor; fields absent from the input are omitted rather
//! than serialized as null.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Type descriptor for a single request field.
#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    /// Quote the value as a JSON string.
    Str,
    /// Emit the value literally (numbers, booleans, pre-encoded fragments).
    Bare,
    /// Recurse with a nested schema.
    Object(Schema),
    /// Encode each element under the given descriptor.
    Array(&'static FieldType),
}

/// A field table: ordered (name, descriptor) pairs.
pub type Schema = &'static [(&'static str, FieldType)];

/// Encode `input` under `schema`, omitting absent fields.
///
/// # Errors
///
/// `Error::Schema` when a descriptor cannot encode the supplied value
/// (object descriptor on a non-object, array descriptor on a non-array).
pub fn encode(input: &Map<String, Value>, schema: Schema) -> Result<Value> {
    let mut out = Map::new();
    for (name, descriptor) in schema {
        if let Some(value) = input.get(*name) {
            out.insert((*name).to_string(), encode_field(name, value, descriptor)?);
        }
    }
    Ok(Value::Object(out))
}

fn encode_field(field: &str, value: &Value, descriptor: &FieldType) -> Result<Value> {
    match *descriptor {
        FieldType::Str => Ok(match value {
            Value::String(_) => value.clone(),
            Value::Null => Value::Null,
            other => Value::String(other.to_string()),
        }),
        FieldType::Bare => Ok(value.clone()),
        FieldType::Object(schema) => match value {
            Value::Object(map) => encode(map, schema),
            Value::Null => Ok(Value::Null),
            other => Err(Error::Schema {
                field: field.to_string(),
                reason: format!("expected object, got {other}"),
            }),
        },
        FieldType::Array(element) => match value {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(encode_field(field, item, element)?);
                }
                Ok(Value::Array(out))
            }
            other => Err(Error::Schema {
                field: field.to_string(),
                reason: format!("expected array, got {other}"),
            }),
        },
    }
}

/// URL-encode GET parameters as `key=value` pairs.
#[must_use]
pub fn query_string(pairs: &[(&str, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}
