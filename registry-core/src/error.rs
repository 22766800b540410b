//! Error taxonomy for the registry core.

use crate::record::{SchemaId, Version};
use thiserror::Error;

/// All possible errors surfaced by the registry core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Parser rejected the input; caller should fix and retry.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Candidate schema failed a compatibility check; carries violation
    /// messages suitable for inclusion in a client-facing error response.
    #[error("incompatible schema: {}", .messages.join("; "))]
    IncompatibleSchema { messages: Vec<String> },

    #[error("subject not found: {0}")]
    SubjectNotFound(String),

    #[error("version not found: subject={subject}, version={version}")]
    VersionNotFound { subject: String, version: i64 },

    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    /// Internal dedupe-race signal. Reconciled by the engine via a re-read;
    /// must never escape to a caller of [`crate::engine::RegistryEngine`].
    #[error("schema already exists for this fingerprint")]
    SchemaExists,

    /// Import-only: the caller-supplied ID is already bound to a different
    /// fingerprint.
    #[error("schema id {id} conflicts with an existing record of a different fingerprint")]
    SchemaIdConflict { id: SchemaId },

    #[error("cannot delete: referenced by {0} other live schema(s)")]
    ReferencedByOther(usize),

    #[error("operation forbidden: subject or global mode disallows it")]
    ModeForbidden,

    #[error("invalid compatibility level: {0}")]
    InvalidCompatibilityLevel(String),

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    /// Raised when a reference names a `(subject, version)` pair that does
    /// not currently exist.
    #[error("unresolvable reference: subject={subject}, version={version}")]
    UnresolvedReference { subject: String, version: i64 },

    /// Raised when a schema is registered directly under the reserved
    /// `.__GLOBAL` context.
    #[error("schemas may not be registered under the global context")]
    GlobalContextForbidden,

    #[error("invalid import request: {0}")]
    InvalidImportRequest(String),
}

impl Error {
    /// `true` for errors that are purely informational read-misses, useful
    /// for transport layers mapping to HTTP 404s.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::SubjectNotFound(_) | Error::VersionNotFound { .. } | Error::SchemaNotFound(_)
        )
    }
}

/// Result type for registry core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::SubjectNotFound("foo-value".into());
        assert_eq!(err.to_string(), "subject not found: foo-value");

        let err = Error::VersionNotFound {
            subject: "foo-value".into(),
            version: 3,
        };
        assert_eq!(
            err.to_string(),
            "version not found: subject=foo-value, version=3"
        );

        let err = Error::IncompatibleSchema {
            messages: vec!["field 'id' removed".into(), "field 'name' type changed".into()],
        };
        assert_eq!(
            err.to_string(),
            "incompatible schema: field 'id' removed; field 'name' type changed"
        );
    }

    #[test]
    fn is_not_found_classification() {
        assert!(Error::SubjectNotFound("s".into()).is_not_found());
        assert!(Error::SchemaNotFound("s".into()).is_not_found());
        assert!(!Error::ModeForbidden.is_not_found());
        assert!(!Error::SchemaExists.is_not_found());
    }
}
