//! Per-language parsing and canonicalization.
//!
//! Each parser turns schema text plus a reference list into a
//! [`ParsedSchema`]: a validated in-memory form with a deterministic
//! canonical string and a content fingerprint. Parsing is pure and never
//! touches storage or the allocator.

mod avro;
mod json_schema;
mod protobuf;

use crate::error::{Error, Result};
use crate::record::{SchemaReference, SchemaType};
use sha2::{Digest, Sha256};
use std::any::Any;

/// A schema that parsed successfully.
pub trait ParsedSchema: Send + Sync {
    fn schema_type(&self) -> SchemaType;

    /// Deterministic textual form: stable across whitespace, key order, and
    /// equivalent representations; differs whenever semantics differ.
    fn canonical_string(&self) -> String;

    /// Lowercase hex SHA-256 of [`Self::canonical_string`].
    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Downcast hook so per-language compatibility checkers can recover the
    /// structured form instead of re-parsing the canonical string.
    fn as_any(&self) -> &dyn Any;
}

/// A schema an in-memory reference resolves to, supplied by the caller
/// alongside the candidate text being parsed.
#[derive(Debug, Clone)]
pub struct ReferencedSchema {
    pub name: String,
    pub schema: String,
}

/// Parses `text` under `schema_type`, resolving `references` (plus
/// well-known Protobuf imports) against `resolved`.
///
/// `resolved` supplies the schema text for each `reference.name` so the
/// parser can treat it as an in-memory file; callers populate it by looking
/// up each reference's `(subject, version)` in storage before calling in.
pub fn parse(
    schema_type: SchemaType,
    text: &str,
    references: &[SchemaReference],
    resolved: &[ReferencedSchema],
) -> Result<Box<dyn ParsedSchema>> {
    match schema_type {
        SchemaType::Avro => avro::parse(text, resolved).map(|s| Box::new(s) as Box<dyn ParsedSchema>),
        SchemaType::Json => {
            json_schema::parse(text).map(|s| Box::new(s) as Box<dyn ParsedSchema>)
        }
        SchemaType::Protobuf => protobuf::parse(text, references, resolved)
            .map(|s| Box::new(s) as Box<dyn ParsedSchema>),
    }
}

pub(crate) fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidSchema(msg.into())
}

pub use avro::AvroSchema;
pub use json_schema::JsonSchemaSchema;
pub use protobuf::ProtobufSchema;
