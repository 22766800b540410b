//! Protobuf parsing via `protofish`'s pure-Rust descriptor parser (no
//! `protoc` binary required) and canonical-form regeneration.

use super::{invalid, ParsedSchema, ReferencedSchema};
use crate::error::Result;
use crate::record::{SchemaReference, SchemaType};
use protofish::context::Context;
use std::any::Any;
use std::collections::HashSet;

/// Well-known imports resolved in-process; take precedence over any
/// same-named caller-supplied reference.
const WELL_KNOWN: &[(&str, &str)] = &[
    ("google/protobuf/any.proto", include_str!("wkt/any.proto")),
    (
        "google/protobuf/timestamp.proto",
        include_str!("wkt/timestamp.proto"),
    ),
    (
        "google/protobuf/duration.proto",
        include_str!("wkt/duration.proto"),
    ),
    ("google/protobuf/empty.proto", include_str!("wkt/empty.proto")),
    ("google/protobuf/struct.proto", include_str!("wkt/struct.proto")),
    (
        "google/protobuf/wrappers.proto",
        include_str!("wkt/wrappers.proto"),
    ),
    (
        "google/protobuf/field_mask.proto",
        include_str!("wkt/field_mask.proto"),
    ),
    (
        "google/protobuf/descriptor.proto",
        include_str!("wkt/descriptor.proto"),
    ),
];

/// A successfully parsed Protobuf file, canonicalized by regenerating
/// source text with a deterministic ordering. Only messages/enums declared
/// in the candidate text itself participate in the fingerprint; well-known
/// and referenced types exist solely to make parsing succeed.
pub struct ProtobufSchema {
    canonical: String,
    pub(crate) context: Context,
    pub(crate) own_messages: Vec<String>,
}

impl ParsedSchema for ProtobufSchema {
    fn schema_type(&self) -> SchemaType {
        SchemaType::Protobuf
    }

    fn canonical_string(&self) -> String {
        self.canonical.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn parse(
    text: &str,
    references: &[SchemaReference],
    resolved: &[ReferencedSchema],
) -> Result<ProtobufSchema> {
    if references.len() > resolved.len() {
        return Err(invalid("protobuf: unresolved reference"));
    }

    let mut files: Vec<String> = WELL_KNOWN.iter().map(|(_, src)| src.to_string()).collect();
    files.extend(resolved.iter().map(|r| r.schema.clone()));
    files.push(text.to_string());

    let context = Context::parse(&files).map_err(|e| invalid(format!("protobuf: {e:?}")))?;
    let own_names = declared_names(text);
    let canonical = canonicalize(&context, &own_names);
    Ok(ProtobufSchema {
        canonical,
        context,
        own_messages: own_names.into_iter().collect(),
    })
}

/// Scans for top-level `message X` / `enum X` declarations in the candidate
/// text, used to exclude well-known and referenced types from the
/// fingerprint.
fn declared_names(text: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    let tokens: Vec<&str> = text.split_whitespace().collect();
    for pair in tokens.windows(2) {
        if pair[0] == "message" || pair[0] == "enum" {
            let name = pair[1].trim_end_matches('{');
            if !name.is_empty() {
                names.insert(name.to_string());
            }
        }
    }
    names
}

fn short_name(full_name: &str) -> &str {
    full_name.rsplit('.').next().unwrap_or(full_name)
}

/// Regenerates source text with syntax, package, then messages sorted by
/// name, fields sorted by field number, nested messages/enums sorted.
fn canonicalize(context: &Context, own_names: &HashSet<String>) -> String {
    let mut messages: Vec<_> = context
        .messages
        .iter()
        .filter(|m| own_names.contains(short_name(&m.full_name)))
        .collect();
    messages.sort_by(|a, b| a.full_name.cmp(&b.full_name));

    let mut out = String::from("syntax = \"proto3\";\n");
    for message in messages {
        out.push_str("message ");
        out.push_str(&message.full_name);
        out.push_str(" {\n");
        let mut fields: Vec<_> = message.fields.iter().collect();
        fields.sort_by_key(|f| f.number);
        for field in fields {
            out.push_str(&format!(
                "  {:?} {} = {};\n",
                field.r#type,
                field.name,
                field.number
            ));
        }
        out.push_str("}\n");
    }

    let mut enums: Vec<_> = context
        .enums
        .iter()
        .filter(|e| own_names.contains(short_name(&e.full_name)))
        .collect();
    enums.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    for enum_ty in enums {
        out.push_str("enum ");
        out.push_str(&enum_ty.full_name);
        out.push_str(" {\n");
        let mut values: Vec<_> = enum_ty.fields.iter().collect();
        values.sort_by_key(|v| v.value);
        for value in values {
            out.push_str(&format!("  {} = {};\n", value.name, value.value));
        }
        out.push_str("}\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_message() {
        let text = "syntax = \"proto3\";\nmessage U { int32 id = 1; }\n";
        let parsed = parse(text, &[], &[]).unwrap();
        assert_eq!(parsed.schema_type(), SchemaType::Protobuf);
        assert!(parsed.canonical_string().contains("message"));
    }

    #[test]
    fn field_order_does_not_affect_fingerprint() {
        let a = parse(
            "syntax = \"proto3\";\nmessage U { int32 id = 1; string name = 2; }\n",
            &[],
            &[],
        )
        .unwrap();
        let b = parse(
            "syntax = \"proto3\";\nmessage U { string name = 2; int32 id = 1; }\n",
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn field_type_change_changes_fingerprint() {
        let a = parse(
            "syntax = \"proto3\";\nmessage U { int32 id = 1; }\n",
            &[],
            &[],
        )
        .unwrap();
        let b = parse(
            "syntax = \"proto3\";\nmessage U { string id = 1; }\n",
            &[],
            &[],
        )
        .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn rejects_unresolvable_reference() {
        let refs = vec![SchemaReference::new("Other", "other-value", 1)];
        assert!(parse(
            "syntax = \"proto3\";\nmessage U { Other o = 1; }\n",
            &refs,
            &[],
        )
        .is_err());
    }
}
