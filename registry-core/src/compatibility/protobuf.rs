//! Protobuf compatibility: field-number-keyed comparison. Proto3 wire
//! compatibility breaks when a field number is reused for an incompatible
//! type, so that is the only signal checked; pure additions or removals of
//! field numbers are non-breaking under proto3 semantics.

use super::{CompatibilityResult, PairwiseChecker};
use crate::parser::{ParsedSchema, ProtobufSchema};
use std::collections::HashMap;

pub struct ProtobufChecker;

fn downcast<'a>(schema: &'a dyn ParsedSchema) -> &'a ProtobufSchema {
    schema
        .as_any()
        .downcast_ref::<ProtobufSchema>()
        .expect("protobuf checker invoked with a non-Protobuf ParsedSchema")
}

/// Field-number -> declared-type-name map for every message this schema
/// itself declares.
fn fields_by_number(schema: &ProtobufSchema) -> HashMap<i64, String> {
    let mut map = HashMap::new();
    for message in &schema.context.messages {
        let short = message.full_name.rsplit('.').next().unwrap_or(&message.full_name);
        if !schema.own_messages.iter().any(|n| n == short) {
            continue;
        }
        for field in &message.fields {
            map.insert(field.number as i64, format!("{:?}", field.r#type));
        }
    }
    map
}

impl PairwiseChecker for ProtobufChecker {
    fn check_backward(
        &self,
        candidate: &dyn ParsedSchema,
        existing: &dyn ParsedSchema,
    ) -> CompatibilityResult {
        let candidate = downcast(candidate);
        let existing = downcast(existing);

        let old_fields = fields_by_number(existing);
        let new_fields = fields_by_number(candidate);

        let mut messages = Vec::new();
        for (number, old_ty) in &old_fields {
            if let Some(new_ty) = new_fields.get(number) {
                if new_ty != old_ty {
                    messages.push(format!(
                        "field number {number} changed type from {old_ty} to {new_ty}"
                    ));
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
