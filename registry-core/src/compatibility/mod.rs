//! Per-language pairwise/transitive compatibility verdicts.

mod avro;
mod json_schema;
mod protobuf;

use crate::error::{Error, Result};
use crate::parser::ParsedSchema;
use crate::record::SchemaType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the seven policies governing whether a new version may be
/// registered relative to prior ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityLevel {
    None,
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
}

impl Default for CompatibilityLevel {
    fn default() -> Self {
        CompatibilityLevel::Backward
    }
}

impl CompatibilityLevel {
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            CompatibilityLevel::BackwardTransitive
                | CompatibilityLevel::ForwardTransitive
                | CompatibilityLevel::FullTransitive
        )
    }

    /// The non-transitive direction underlying a transitive level (used to
    /// run the same per-pair check against every historical version).
    pub fn base(&self) -> CompatibilityLevel {
        match self {
            CompatibilityLevel::BackwardTransitive => CompatibilityLevel::Backward,
            CompatibilityLevel::ForwardTransitive => CompatibilityLevel::Forward,
            CompatibilityLevel::FullTransitive => CompatibilityLevel::Full,
            other => *other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityLevel::None => "NONE",
            CompatibilityLevel::Backward => "BACKWARD",
            CompatibilityLevel::BackwardTransitive => "BACKWARD_TRANSITIVE",
            CompatibilityLevel::Forward => "FORWARD",
            CompatibilityLevel::ForwardTransitive => "FORWARD_TRANSITIVE",
            CompatibilityLevel::Full => "FULL",
            CompatibilityLevel::FullTransitive => "FULL_TRANSITIVE",
        }
    }
}

impl fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(CompatibilityLevel::None),
            "BACKWARD" => Ok(CompatibilityLevel::Backward),
            "BACKWARD_TRANSITIVE" => Ok(CompatibilityLevel::BackwardTransitive),
            "FORWARD" => Ok(CompatibilityLevel::Forward),
            "FORWARD_TRANSITIVE" => Ok(CompatibilityLevel::ForwardTransitive),
            "FULL" => Ok(CompatibilityLevel::Full),
            "FULL_TRANSITIVE" => Ok(CompatibilityLevel::FullTransitive),
            other => Err(Error::InvalidCompatibilityLevel(other.to_string())),
        }
    }
}

/// Outcome of a single [`check`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityResult {
    pub is_compatible: bool,
    pub messages: Vec<String>,
}

impl CompatibilityResult {
    pub fn compatible() -> Self {
        Self {
            is_compatible: true,
            messages: vec![],
        }
    }

    pub fn incompatible(messages: Vec<String>) -> Self {
        Self {
            is_compatible: false,
            messages,
        }
    }

    fn merge(mut self, other: CompatibilityResult) -> Self {
        self.is_compatible = self.is_compatible && other.is_compatible;
        self.messages.extend(other.messages);
        self
    }
}

/// Per-language pairwise comparison: can `candidate` and `existing` coexist
/// under `BACKWARD`/`FORWARD`/`FULL` semantics.
trait PairwiseChecker {
    fn check_backward(
        &self,
        candidate: &dyn ParsedSchema,
        existing: &dyn ParsedSchema,
    ) -> CompatibilityResult;

    fn check_forward(
        &self,
        candidate: &dyn ParsedSchema,
        existing: &dyn ParsedSchema,
    ) -> CompatibilityResult {
        // Forward(candidate, existing) == Backward(existing, candidate):
        // readers on `existing` must be able to read data written with
        // `candidate`.
        self.check_backward(existing, candidate)
    }

    fn check_full(
        &self,
        candidate: &dyn ParsedSchema,
        existing: &dyn ParsedSchema,
    ) -> CompatibilityResult {
        self.check_backward(candidate, existing)
            .merge(self.check_forward(candidate, existing))
    }
}

fn checker_for(schema_type: SchemaType) -> Box<dyn PairwiseChecker> {
    match schema_type {
        SchemaType::Avro => Box::new(avro::AvroChecker),
        SchemaType::Protobuf => Box::new(protobuf::ProtobufChecker),
        SchemaType::Json => Box::new(json_schema::JsonSchemaChecker),
    }
}

/// `Check(level, candidate, existing) -> CompatibilityResult`.
///
/// `existing` is the ordered comparison set chosen by the caller: the single
/// latest version for non-transitive levels, or every live version in order
/// for transitive ones.
pub fn check(
    level: CompatibilityLevel,
    candidate: &dyn ParsedSchema,
    existing: &[Box<dyn ParsedSchema>],
) -> CompatibilityResult {
    if level == CompatibilityLevel::None {
        return CompatibilityResult::compatible();
    }
    if existing.is_empty() {
        return CompatibilityResult::compatible();
    }

    let checker = checker_for(candidate.schema_type());
    let base = level.base();

    let targets: Vec<&Box<dyn ParsedSchema>> = if level.is_transitive() {
        existing.iter().collect()
    } else {
        existing.last().into_iter().collect()
    };

    let mut result = CompatibilityResult::compatible();
    for target in targets {
        let pair_result = match base {
            CompatibilityLevel::Backward => checker.check_backward(candidate, target.as_ref()),
            CompatibilityLevel::Forward => checker.check_forward(candidate, target.as_ref()),
            CompatibilityLevel::Full => checker.check_full(candidate, target.as_ref()),
            CompatibilityLevel::None => CompatibilityResult::compatible(),
            _ => unreachable!("base() never returns a transitive level"),
        };
        result = result.merge(pair_result);
    }
    result
}
