//! The storage backend contract: durable state, atomic
//! ID/version allocation, content-addressed lookup, and soft/permanent
//! deletion. The engine holds no locks of its own — every ordering and
//! uniqueness invariant here is the backend's responsibility.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "cassandra")]
pub mod cassandra;

use crate::compatibility::CompatibilityLevel;
use crate::error::Result;
use crate::record::{Mode, SchemaId, SchemaRecord, Version};
use async_trait::async_trait;

/// Scope at which a [`CompatibilityLevel`] or [`Mode`] applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Global,
    Subject(String),
}

/// The operation set a backend must implement to host parsing,
/// compatibility checking, and ID/version allocation correctly.
///
/// Implementations are one of three isolation regimes:
/// serializable-transactional (relational), linearizable key-value
/// (wide-column, CAS loop), or process-local (in-memory mutex).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Atomically allocates an ID and the next per-subject version and
    /// persists `record`, unless a non-deleted record already shares
    /// `(record.subject, record.fingerprint)` — in which case this returns
    /// `Err(Error::SchemaExists)` without allocating anything.
    ///
    /// `record.id` and `record.version` are ignored on input and overwritten
    /// by the allocator; callers should pass placeholder values.
    async fn create_schema(&self, record: SchemaRecord) -> Result<SchemaRecord>;

    async fn get_schema_by_id(&self, id: SchemaId) -> Result<SchemaRecord>;

    async fn get_schema_by_subject_version(
        &self,
        subject: &str,
        version: Version,
    ) -> Result<SchemaRecord>;

    async fn get_schema_by_fingerprint(
        &self,
        subject: &str,
        fingerprint: &str,
        include_deleted: bool,
    ) -> Result<SchemaRecord>;

    async fn get_latest_schema(&self, subject: &str) -> Result<SchemaRecord>;

    async fn get_schemas_by_subject(
        &self,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<SchemaRecord>>;

    async fn list_subjects(&self, include_deleted: bool) -> Result<Vec<String>>;

    async fn get_subjects_by_schema_id(
        &self,
        id: SchemaId,
        include_deleted: bool,
    ) -> Result<Vec<String>>;

    async fn get_versions_by_schema_id(
        &self,
        id: SchemaId,
        include_deleted: bool,
    ) -> Result<Vec<Version>>;

    /// Soft (`deleted=true`) or permanent (row erased) deletion of a single
    /// version. Permanent deletion of a version referenced by another live
    /// schema fails with `Error::ReferencedByOther`.
    async fn delete_schema(&self, subject: &str, version: Version, permanent: bool) -> Result<()>;

    /// Soft or permanent deletion of every version of `subject`, returning
    /// the affected version numbers. Permanent mode also drops per-subject
    /// config and mode records.
    async fn delete_subject(&self, subject: &str, permanent: bool) -> Result<Vec<Version>>;

    /// `(subject, version)` pairs of live records whose `references` name
    /// this record. Soft-deleted referrers are excluded by default (see
    /// `DESIGN.md` for the reasoning).
    async fn get_referenced_by(
        &self,
        subject: &str,
        version: Version,
    ) -> Result<Vec<(String, Version)>>;

    async fn set_config(&self, scope: Scope, level: CompatibilityLevel) -> Result<()>;
    async fn get_config(&self, scope: Scope) -> Result<Option<CompatibilityLevel>>;
    async fn delete_config(&self, scope: Scope) -> Result<()>;

    async fn set_mode(&self, scope: Scope, mode: Mode) -> Result<()>;
    async fn get_mode(&self, scope: Scope) -> Result<Option<Mode>>;
    async fn delete_mode(&self, scope: Scope) -> Result<()>;

    /// Inserts with caller-supplied `id`/`version`. Fails with
    /// `Error::SchemaIdConflict` if `id` already names a record with a
    /// different fingerprint, or `Error::SchemaExists` if `(subject,
    /// version)` is already taken.
    async fn import_schema(&self, record: SchemaRecord) -> Result<SchemaRecord>;

    /// Resets the allocator so the next `create_schema` produces an ID
    /// `>= n`. Must never decrease the allocator.
    async fn set_next_id(&self, n: SchemaId) -> Result<()>;

    async fn is_healthy(&self) -> bool;
}
