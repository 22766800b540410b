//! The immutable unit of storage: a `SchemaRecord` and its supporting types
//!

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A globally unique, monotonically increasing schema identifier.
pub type SchemaId = i64;

/// A dense, per-subject version number starting at 1.
pub type Version = i64;

/// The schema language a [`SchemaRecord`] is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    Avro,
    Protobuf,
    Json,
}

impl Default for SchemaType {
    /// AVRO is the implicit default when a client omits `schemaType`.
    fn default() -> Self {
        SchemaType::Avro
    }
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Avro => "AVRO",
            SchemaType::Protobuf => "PROTOBUF",
            SchemaType::Json => "JSON",
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVRO" => Ok(SchemaType::Avro),
            "PROTOBUF" => Ok(SchemaType::Protobuf),
            "JSON" | "JSONSCHEMA" | "JSON_SCHEMA" => Ok(SchemaType::Json),
            other => Err(crate::error::Error::InvalidSchema(format!(
                "unknown schema type: {other}"
            ))),
        }
    }
}

/// A named dependency edge: `this.name` resolves to `(subject, version)` of
/// another [`SchemaRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaReference {
    pub name: String,
    pub subject: String,
    pub version: Version,
}

impl SchemaReference {
    pub fn new(name: impl Into<String>, subject: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            version,
        }
    }
}

/// The immutable unit of storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRecord {
    pub id: SchemaId,
    pub subject: String,
    pub version: Version,
    pub schema_type: SchemaType,
    pub schema: String,
    pub fingerprint: String,
    #[serde(default)]
    pub references: Vec<SchemaReference>,
    pub deleted: bool,
    pub created_at: Timestamp,
}

impl SchemaRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SchemaId,
        subject: impl Into<String>,
        version: Version,
        schema_type: SchemaType,
        schema: impl Into<String>,
        fingerprint: impl Into<String>,
        references: Vec<SchemaReference>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            subject: subject.into(),
            version,
            schema_type,
            schema: schema.into(),
            fingerprint: fingerprint.into(),
            references,
            deleted: false,
            created_at,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// Governs which mutation operations a subject, or the whole store, admits
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    ReadWrite,
    ReadOnly,
    Import,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::ReadWrite
    }
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::ReadWrite => "READWRITE",
            Mode::ReadOnly => "READONLY",
            Mode::Import => "IMPORT",
        }
    }

    /// Whether this mode admits ordinary registration/mutation traffic.
    pub fn admits_writes(&self) -> bool {
        matches!(self, Mode::ReadWrite)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "READWRITE" => Ok(Mode::ReadWrite),
            "READONLY" => Ok(Mode::ReadOnly),
            "IMPORT" => Ok(Mode::Import),
            other => Err(crate::error::Error::InvalidMode(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_type_default_is_avro() {
        assert_eq!(SchemaType::default(), SchemaType::Avro);
    }

    #[test]
    fn schema_type_from_str_case_insensitive() {
        assert_eq!("avro".parse::<SchemaType>().unwrap(), SchemaType::Avro);
        assert_eq!(
            "PROTOBUF".parse::<SchemaType>().unwrap(),
            SchemaType::Protobuf
        );
        assert!("nonsense".parse::<SchemaType>().is_err());
    }

    #[test]
    fn mode_admits_writes_only_in_readwrite() {
        assert!(Mode::ReadWrite.admits_writes());
        assert!(!Mode::ReadOnly.admits_writes());
        assert!(!Mode::Import.admits_writes());
    }

    #[test]
    fn record_is_live_until_deleted() {
        let mut record = SchemaRecord::new(
            1,
            "foo-value",
            1,
            SchemaType::Avro,
            r#"{"type":"string"}"#,
            "deadbeef",
            vec![],
            0,
        );
        assert!(record.is_live());
        record.deleted = true;
        assert!(!record.is_live());
    }

    #[test]
    fn serialization_roundtrip() {
        let record = SchemaRecord::new(
            1,
            "foo-value",
            1,
            SchemaType::Avro,
            r#"{"type":"string"}"#,
            "deadbeef",
            vec![SchemaReference::new("Inner", "inner-value", 2)],
            1_700_000_000,
        );
        let json = serde_json::to_string(&record).unwrap();
        let parsed: SchemaRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
