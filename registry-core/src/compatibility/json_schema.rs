//! JSON Schema compatibility: structural comparison of `properties` and
//! `required`, the two facets that determine whether a reader built against
//! one schema can consume data shaped by the other.

use super::{CompatibilityResult, PairwiseChecker};
use crate::parser::{JsonSchemaSchema, ParsedSchema};
use serde_json::Value;
use std::collections::HashSet;

pub struct JsonSchemaChecker;

fn downcast<'a>(schema: &'a dyn ParsedSchema) -> &'a JsonSchemaSchema {
    schema
        .as_any()
        .downcast_ref::<JsonSchemaSchema>()
        .expect("json schema checker invoked with a non-JSON-Schema ParsedSchema")
}

fn type_of(doc: &Value) -> Option<&str> {
    doc.get("type").and_then(Value::as_str)
}

fn required_of(doc: &Value) -> HashSet<String> {
    doc.get("required")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn properties_of(doc: &Value) -> Vec<(&str, &Value)> {
    doc.get("properties")
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.as_str(), v)).collect())
        .unwrap_or_default()
}

impl PairwiseChecker for JsonSchemaChecker {
    fn check_backward(
        &self,
        candidate: &dyn ParsedSchema,
        existing: &dyn ParsedSchema,
    ) -> CompatibilityResult {
        let candidate = &downcast(candidate).document;
        let existing = &downcast(existing).document;

        let mut messages = Vec::new();

        if let (Some(old_ty), Some(new_ty)) = (type_of(existing), type_of(candidate)) {
            if old_ty != new_ty {
                messages.push(format!("type changed from '{old_ty}' to '{new_ty}'"));
            }
        }

        // A reader built against `candidate` must tolerate data written
        // under `existing`: every field `existing` could have emitted that
        // `candidate` now requires (but did not previously) is a break,
        // and narrowing a previously-declared property's type is a break.
        let new_required = required_of(candidate);
        let old_required = required_of(existing);
        for field in new_required.difference(&old_required) {
            messages.push(format!(
                "field '{field}' is newly required; old data may not carry it"
            ));
        }

        let old_props = properties_of(existing);
        let new_props = properties_of(candidate);
        for (name, old_schema) in &old_props {
            if let Some((_, new_schema)) = new_props.iter().find(|(n, _)| n == name) {
                if let (Some(old_ty), Some(new_ty)) = (type_of(old_schema), type_of(new_schema)) {
                    if old_ty != new_ty {
                        messages.push(format!(
                            "property '{name}' type changed from '{old_ty}' to '{new_ty}'"
                        ));
                    }
                }
            }
        }

        if messages.is_empty() {
            CompatibilityResult::compatible()
        } else {
            CompatibilityResult::incompatible(messages)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::record::SchemaType;

    fn parsed(text: &str) -> Box<dyn ParsedSchema> {
        parse(SchemaType::Json, text, &[], &[]).unwrap()
    }

    #[test]
    fn adding_optional_property_is_compatible() {
        let old = parsed(r#"{"type":"object","properties":{"id":{"type":"integer"}}}"#);
        let new = parsed(
            r#"{"type":"object","properties":{"id":{"type":"integer"},"name":{"type":"string"}}}"#,
        );
        let result = JsonSchemaChecker.check_backward(new.as_ref(), old.as_ref());
        assert!(result.is_compatible);
    }

    #[test]
    fn newly_required_field_is_incompatible() {
        let old = parsed(r#"{"type":"object","properties":{"id":{"type":"integer"}}}"#);
        let new = parsed(
            r#"{"type":"object","properties":{"id":{"type":"integer"},"name":{"type":"string"}},"required":["name"]}"#,
        );
        let result = JsonSchemaChecker.check_backward(new.as_ref(), old.as_ref());
        assert!(!result.is_compatible);
    }

    #[test]
    fn narrowing_property_type_is_incompatible() {
        let old = parsed(r#"{"type":"object","properties":{"id":{"type":"string"}}}"#);
        let new = parsed(r#"{"type":"object","properties":{"id":{"type":"integer"}}}"#);
        let result = JsonSchemaChecker.check_backward(new.as_ref(), old.as_ref());
        assert!(!result.is_compatible);
    }
}
