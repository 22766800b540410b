//! Avro compatibility, delegated to `apache_avro`'s schema resolution rules.

use super::{CompatibilityResult, PairwiseChecker};
use crate::parser::{AvroSchema, ParsedSchema};
use apache_avro::schema_compatibility::SchemaCompatibility;

pub struct AvroChecker;

fn downcast<'a>(schema: &'a dyn ParsedSchema) -> &'a AvroSchema {
    schema
        .as_any()
        .downcast_ref::<AvroSchema>()
        .expect("avro checker invoked with a non-Avro ParsedSchema")
}

impl PairwiseChecker for AvroChecker {
    fn check_backward(
        &self,
        candidate: &dyn ParsedSchema,
        existing: &dyn ParsedSchema,
    ) -> CompatibilityResult {
        let candidate = downcast(candidate);
        let existing = downcast(existing);

        // Readers using `candidate` must be able to read data written with
        // `existing` (the writer).
        if SchemaCompatibility::can_read(&existing.schema, &candidate.schema) {
            CompatibilityResult::compatible()
        } else {
            CompatibilityResult::incompatible(vec![format!(
                "reader schema cannot read data written by writer schema '{}'",
                existing.canonical_string()
            )])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::record::SchemaType;

    fn parsed(text: &str) -> Box<dyn ParsedSchema> {
        parse(SchemaType::Avro, text, &[], &[]).unwrap()
    }

    #[test]
    fn adding_optional_field_is_backward_compatible() {
        let old = parsed(r#"{"type":"record","name":"U","fields":[{"name":"id","type":"int"}]}"#);
        let new = parsed(
            r#"{"type":"record","name":"U","fields":[{"name":"id","type":"int"},{"name":"name","type":["null","string"],"default":null}]}"#,
        );
        let result = AvroChecker.check_backward(new.as_ref(), old.as_ref());
        assert!(result.is_compatible);
    }

    #[test]
    fn removing_required_field_breaks_backward_compat() {
        let old = parsed(r#"{"type":"record","name":"U","fields":[{"name":"id","type":"int"}]}"#);
        let new = parsed(
            r#"{"type":"record","name":"U","fields":[{"name":"other","type":"string"}]}"#,
        );
        let result = AvroChecker.check_backward(new.as_ref(), old.as_ref());
        assert!(!result.is_compatible);
    }
}
