//! JSON Schema parsing and canonicalization.

use super::{invalid, ParsedSchema};
use crate::error::Result;
use crate::record::SchemaType;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;

/// A successfully parsed JSON Schema document.
pub struct JsonSchemaSchema {
    canonical: String,
    pub(crate) document: Value,
}

impl ParsedSchema for JsonSchemaSchema {
    fn schema_type(&self) -> SchemaType {
        SchemaType::Json
    }

    fn canonical_string(&self) -> String {
        self.canonical.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn parse(text: &str) -> Result<JsonSchemaSchema> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| invalid(format!("json schema: {e}")))?;

    // Confirms the document itself compiles as a schema (syntactic and
    // `$ref`-resolution validity), without validating any instance data.
    jsonschema::validator_for(&value).map_err(|e| invalid(format!("json schema: {e}")))?;

    let canonical = canonicalize(&value);
    Ok(JsonSchemaSchema {
        canonical,
        document: value,
    })
}

/// Structural walk: sorts object keys, normalizes scalar forms (integral
/// floats render without a decimal point), recurses into arrays in place.
fn canonicalize(value: &Value) -> String {
    let mut buf = String::new();
    write_canonical(value, &mut buf);
    buf
}

fn write_canonical(value: &Value, buf: &mut String) {
    match value {
        Value::Null => buf.push_str("null"),
        Value::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                buf.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                buf.push_str(&u.to_string());
            } else if let Some(f) = n.as_f64() {
                // Integers rendered without a decimal point, even when the
                // source literal carried one (e.g. `1.0`).
                if f.fract() == 0.0 && f.is_finite() {
                    buf.push_str(&(f as i64).to_string());
                } else {
                    buf.push_str(&n.to_string());
                }
            }
        }
        Value::String(s) => {
            buf.push_str(&serde_json::to_string(s).expect("string always serializes"));
        }
        Value::Array(items) => {
            buf.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_canonical(item, buf);
            }
            buf.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            buf.push('{');
            for (i, (key, val)) in sorted.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                buf.push_str(&serde_json::to_string(key).expect("string always serializes"));
                buf.push(':');
                write_canonical(val, buf);
            }
            buf.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_does_not_affect_fingerprint() {
        let a = parse(r#"{"type":"object","properties":{"a":{"type":"string"}}}"#).unwrap();
        let b = parse(r#"{"properties":{"a":{"type":"string"}},"type":"object"}"#).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn integral_float_normalizes_like_integer() {
        let a = parse(r#"{"type":"number","minimum":1}"#).unwrap();
        let b = parse(r#"{"type":"number","minimum":1.0}"#).unwrap();
        assert_eq!(a.canonical_string(), b.canonical_string());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse("{not json").is_err());
    }
}
