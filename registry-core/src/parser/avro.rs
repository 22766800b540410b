//! Avro parsing and Parsing Canonical Form.

use super::{invalid, ParsedSchema, ReferencedSchema};
use crate::error::Result;
use crate::record::SchemaType;
use apache_avro::Schema as AvroSchemaInner;
use serde_json::Value;
use std::any::Any;

/// A successfully parsed Avro schema.
pub struct AvroSchema {
    canonical: String,
    pub(crate) schema: AvroSchemaInner,
}

impl ParsedSchema for AvroSchema {
    fn schema_type(&self) -> SchemaType {
        SchemaType::Avro
    }

    fn canonical_string(&self) -> String {
        self.canonical.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parses `text`, resolving named types from `references` first so they are
/// visible to the candidate schema (named-type resolution, not textual
/// substitution).
pub fn parse(text: &str, references: &[ReferencedSchema]) -> Result<AvroSchema> {
    if references.is_empty() {
        let schema =
            AvroSchemaInner::parse_str(text).map_err(|e| invalid(format!("avro: {e}")))?;
        let canonical = canonicalize(&schema)?;
        return Ok(AvroSchema { canonical, schema });
    }

    let mut texts: Vec<&str> = references.iter().map(|r| r.schema.as_str()).collect();
    texts.push(text);
    let schemas = AvroSchemaInner::parse_list(&texts).map_err(|e| invalid(format!("avro: {e}")))?;
    let last = schemas
        .into_iter()
        .last()
        .ok_or_else(|| invalid("avro: empty schema list"))?;
    let canonical = canonicalize(&last)?;
    Ok(AvroSchema {
        canonical,
        schema: last,
    })
}

/// `apache_avro`'s own `canonical_form()` implements the upstream Parsing
/// Canonical Form rules (strip docs/aliases, normalize key order,
/// fully-qualify names) but, unlike this spec's canonical form, leaves
/// record field declaration order untouched. Re-parse that output as JSON
/// and sort every record's `fields` array by name, recursively, so two
/// records that differ only in field order fingerprint identically.
fn canonicalize(schema: &AvroSchemaInner) -> Result<String> {
    let mut value: Value = serde_json::from_str(&schema.canonical_form())
        .map_err(|e| invalid(format!("avro: canonical form is not valid JSON: {e}")))?;
    sort_record_fields(&mut value);
    serde_json::to_string(&value)
        .map_err(|e| invalid(format!("avro: failed to re-serialize canonical form: {e}")))
}

fn sort_record_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(fields)) = map.get_mut("fields") {
                for field in fields.iter_mut() {
                    if let Value::Object(field_obj) = field {
                        if let Some(field_type) = field_obj.get_mut("type") {
                            sort_record_fields(field_type);
                        }
                    }
                }
                fields.sort_by(|a, b| {
                    let name_of = |f: &Value| f.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                    name_of(a).cmp(&name_of(b))
                });
            }
            for (key, nested) in map.iter_mut() {
                if key != "fields" {
                    sort_record_fields(nested);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                sort_record_fields(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitive_schema() {
        let parsed = parse(r#"{"type":"string"}"#, &[]).unwrap();
        assert_eq!(parsed.schema_type(), SchemaType::Avro);
        assert!(!parsed.canonical_string().is_empty());
    }

    #[test]
    fn canonical_form_is_whitespace_stable() {
        let a = parse(r#"{"type":"string"}"#, &[]).unwrap();
        let b = parse(r#"{ "type" : "string" }"#, &[]).unwrap();
        assert_eq!(a.canonical_string(), b.canonical_string());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn semantically_different_schemas_differ() {
        let a = parse(
            r#"{"type":"record","name":"U","fields":[{"name":"id","type":"int"}]}"#,
            &[],
        )
        .unwrap();
        let b = parse(
            r#"{"type":"record","name":"U","fields":[{"name":"other","type":"string"}]}"#,
            &[],
        )
        .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn rejects_invalid_syntax() {
        assert!(parse("not json at all", &[]).is_err());
    }

    #[test]
    fn record_field_order_does_not_affect_fingerprint() {
        let a = parse(
            r#"{"type":"record","name":"U","fields":[{"name":"id","type":"int"},{"name":"name","type":"string"}]}"#,
            &[],
        )
        .unwrap();
        let b = parse(
            r#"{"type":"record","name":"U","fields":[{"name":"name","type":"string"},{"name":"id","type":"int"}]}"#,
            &[],
        )
        .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn nested_record_field_order_does_not_affect_fingerprint() {
        let a = parse(
            r#"{"type":"record","name":"Outer","fields":[{"name":"inner","type":{"type":"record","name":"Inner","fields":[{"name":"x","type":"int"},{"name":"y","type":"int"}]}}]}"#,
            &[],
        )
        .unwrap();
        let b = parse(
            r#"{"type":"record","name":"Outer","fields":[{"name":"inner","type":{"type":"record","name":"Inner","fields":[{"name":"y","type":"int"},{"name":"x","type":"int"}]}}]}"#,
            &[],
        )
        .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
