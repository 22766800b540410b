//! Wide-column backend: allocation via a compare-and-set loop on a
//! dedicated counter row; uniqueness enforced via a `(subject, fingerprint)`
//! index and explicit read-then-conditional-insert ("Linearizable
//! key-value").

use super::{Scope, StorageBackend};
use crate::compatibility::CompatibilityLevel;
use crate::error::{Error, Result};
use crate::record::{Mode, SchemaId, SchemaRecord, SchemaReference, SchemaType, Version};
use async_trait::async_trait;
use scylla::{Session, SessionBuilder};
use std::str::FromStr;
use std::time::Duration;

const MAX_CAS_ATTEMPTS: u32 = 8;
const INITIAL_BACKOFF: Duration = Duration::from_millis(5);

/// A [`StorageBackend`] backed by Apache Cassandra / ScyllaDB.
pub struct CassandraBackend {
    session: Session,
    keyspace: String,
}

impl CassandraBackend {
    pub async fn connect(nodes: &[String], keyspace: &str) -> Result<Self> {
        let session = SessionBuilder::new()
            .known_nodes(nodes)
            .build()
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        Ok(Self {
            session,
            keyspace: keyspace.to_string(),
        })
    }

    /// Bounded exponential backoff between CAS retries.
    async fn backoff(attempt: u32) {
        let delay = INITIAL_BACKOFF * 2u32.pow(attempt.min(6));
        tokio::time::sleep(delay).await;
    }

    /// Atomically reads and increments the counter row guarding the
    /// allocator, retrying on a lost compare-and-set race.
    async fn allocate_next_id(&self) -> Result<SchemaId> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current: Option<(i64,)> = self
                .session
                .query(
                    format!(
                        "SELECT next_id FROM {}.allocator WHERE name = 'schema_id'",
                        self.keyspace
                    ),
                    &[],
                )
                .await
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?
                .maybe_first_row_typed()
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

            let current_id = current.map(|(v,)| v).unwrap_or(0);
            let next_id = current_id + 1;

            let applied: (bool,) = self
                .session
                .query(
                    format!(
                        "UPDATE {}.allocator SET next_id = ? WHERE name = 'schema_id' IF next_id = ?",
                        self.keyspace
                    ),
                    (next_id, current_id),
                )
                .await
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?
                .first_row_typed()
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

            if applied.0 {
                return Ok(next_id);
            }
            Self::backoff(attempt).await;
        }
        Err(Error::StorageUnavailable(
            "allocator compare-and-set did not converge".to_string(),
        ))
    }

    async fn next_version(&self, subject: &str) -> Result<Version> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current: Option<(i64,)> = self
                .session
                .query(
                    format!(
                        "SELECT last_version FROM {}.subject_versions WHERE subject = ?",
                        self.keyspace
                    ),
                    (subject,),
                )
                .await
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?
                .maybe_first_row_typed()
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

            let current_version = current.map(|(v,)| v).unwrap_or(0);
            let next_version = current_version + 1;

            let applied: (bool,) = self
                .session
                .query(
                    format!(
                        "UPDATE {}.subject_versions SET last_version = ? WHERE subject = ? IF last_version = ?",
                        self.keyspace
                    ),
                    (next_version, subject, current_version),
                )
                .await
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?
                .first_row_typed()
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

            if applied.0 {
                return Ok(next_version);
            }
            Self::backoff(attempt).await;
        }
        Err(Error::StorageUnavailable(
            "per-subject version compare-and-set did not converge".to_string(),
        ))
    }
}

#[async_trait]
impl StorageBackend for CassandraBackend {
    async fn create_schema(&self, mut record: SchemaRecord) -> Result<SchemaRecord> {
        let existing = self
            .session
            .query(
                format!(
                    "SELECT id FROM {}.schemas_by_subject_fingerprint WHERE subject = ? AND fingerprint = ? AND deleted = false",
                    self.keyspace
                ),
                (&record.subject, &record.fingerprint),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .maybe_first_row_typed::<(SchemaId,)>()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        if existing.is_some() {
            return Err(Error::SchemaExists);
        }

        let id = self.allocate_next_id().await?;
        let version = self.next_version(&record.subject).await?;
        record.id = id;
        record.version = version;
        record.deleted = false;

        let references_json = serde_json::to_string(&record.references)
            .map_err(|e| Error::InvalidSchema(format!("references did not serialize: {e}")))?;

        self.session
            .query(
                format!(
                    r#"
                    INSERT INTO {}.schemas
                        (id, subject, version, schema_type, schema, fingerprint, references, deleted, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, false, ?)
                    "#,
                    self.keyspace
                ),
                (
                    record.id,
                    &record.subject,
                    record.version,
                    record.schema_type.as_str(),
                    &record.schema,
                    &record.fingerprint,
                    references_json,
                    record.created_at,
                ),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        Ok(record)
    }

    async fn get_schema_by_id(&self, id: SchemaId) -> Result<SchemaRecord> {
        let row = self
            .session
            .query(
                format!("SELECT * FROM {}.schemas WHERE id = ? LIMIT 1", self.keyspace),
                (id,),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .maybe_first_row_typed::<CassandraRow>()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        row.map(CassandraRow::into_record)
            .transpose()?
            .ok_or_else(|| Error::SchemaNotFound(id.to_string()))
    }

    async fn get_schema_by_subject_version(
        &self,
        subject: &str,
        version: Version,
    ) -> Result<SchemaRecord> {
        let row = self
            .session
            .query(
                format!(
                    "SELECT * FROM {}.schemas WHERE subject = ? AND version = ? LIMIT 1",
                    self.keyspace
                ),
                (subject, version),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .maybe_first_row_typed::<CassandraRow>()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        row.map(CassandraRow::into_record)
            .transpose()?
            .ok_or_else(|| Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            })
    }

    async fn get_schema_by_fingerprint(
        &self,
        subject: &str,
        fingerprint: &str,
        include_deleted: bool,
    ) -> Result<SchemaRecord> {
        let rows = self
            .session
            .query(
                format!(
                    "SELECT * FROM {}.schemas WHERE subject = ? AND fingerprint = ?",
                    self.keyspace
                ),
                (subject, fingerprint),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .rows_typed::<CassandraRow>()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        for row in rows {
            let row = row.map_err(|e| Error::StorageUnavailable(e.to_string()))?;
            if include_deleted || !row.deleted {
                return row.into_record();
            }
        }
        Err(Error::SchemaNotFound(fingerprint.to_string()))
    }

    async fn get_latest_schema(&self, subject: &str) -> Result<SchemaRecord> {
        let records = self.get_schemas_by_subject(subject, false).await?;
        records
            .into_iter()
            .max_by_key(|r| r.version)
            .ok_or_else(|| Error::SubjectNotFound(subject.to_string()))
    }

    async fn get_schemas_by_subject(
        &self,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<SchemaRecord>> {
        let rows = self
            .session
            .query(
                format!("SELECT * FROM {}.schemas WHERE subject = ?", self.keyspace),
                (subject,),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .rows_typed::<CassandraRow>()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let row = row.map_err(|e| Error::StorageUnavailable(e.to_string()))?;
            if include_deleted || !row.deleted {
                records.push(row.into_record()?);
            }
        }
        if records.is_empty() {
            return Err(Error::SubjectNotFound(subject.to_string()));
        }
        records.sort_by_key(|r| r.version);
        Ok(records)
    }

    async fn list_subjects(&self, include_deleted: bool) -> Result<Vec<String>> {
        let rows = self
            .session
            .query(format!("SELECT subject, deleted FROM {}.schemas", self.keyspace), &[])
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .rows_typed::<(String, bool)>()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        let mut subjects: Vec<String> = rows
            .filter_map(|r| r.ok())
            .filter(|(_, deleted)| include_deleted || !deleted)
            .map(|(subject, _)| subject)
            .collect();
        subjects.sort();
        subjects.dedup();
        Ok(subjects)
    }

    async fn get_subjects_by_schema_id(
        &self,
        id: SchemaId,
        include_deleted: bool,
    ) -> Result<Vec<String>> {
        let rows = self
            .session
            .query(
                format!(
                    "SELECT subject, deleted FROM {}.schemas WHERE id = ? ALLOW FILTERING",
                    self.keyspace
                ),
                (id,),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .rows_typed::<(String, bool)>()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        let mut subjects: Vec<String> = rows
            .filter_map(|r| r.ok())
            .filter(|(_, deleted)| include_deleted || !deleted)
            .map(|(subject, _)| subject)
            .collect();
        subjects.sort();
        subjects.dedup();
        Ok(subjects)
    }

    async fn get_versions_by_schema_id(
        &self,
        id: SchemaId,
        include_deleted: bool,
    ) -> Result<Vec<Version>> {
        let rows = self
            .session
            .query(
                format!(
                    "SELECT version, deleted FROM {}.schemas WHERE id = ? ALLOW FILTERING",
                    self.keyspace
                ),
                (id,),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .rows_typed::<(Version, bool)>()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        let mut versions: Vec<Version> = rows
            .filter_map(|r| r.ok())
            .filter(|(_, deleted)| include_deleted || !deleted)
            .map(|(version, _)| version)
            .collect();
        versions.sort();
        Ok(versions)
    }

    async fn delete_schema(&self, subject: &str, version: Version, permanent: bool) -> Result<()> {
        let referenced = !self.get_referenced_by(subject, version).await?.is_empty();
        if permanent {
            if referenced {
                return Err(Error::ReferencedByOther(1));
            }
            self.session
                .query(
                    format!(
                        "DELETE FROM {}.schemas WHERE subject = ? AND version = ?",
                        self.keyspace
                    ),
                    (subject, version),
                )
                .await
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        } else {
            self.session
                .query(
                    format!(
                        "UPDATE {}.schemas SET deleted = true WHERE subject = ? AND version = ?",
                        self.keyspace
                    ),
                    (subject, version),
                )
                .await
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    async fn delete_subject(&self, subject: &str, permanent: bool) -> Result<Vec<Version>> {
        let records = self.get_schemas_by_subject(subject, true).await?;
        let versions: Vec<Version> = records.iter().map(|r| r.version).collect();

        if permanent {
            for record in &records {
                self.delete_schema(subject, record.version, true).await?;
            }
        } else {
            for record in &records {
                if !record.deleted {
                    self.delete_schema(subject, record.version, false).await?;
                }
            }
        }
        Ok(versions)
    }

    async fn get_referenced_by(
        &self,
        subject: &str,
        version: Version,
    ) -> Result<Vec<(String, Version)>> {
        let rows = self
            .session
            .query(
                format!("SELECT * FROM {}.schemas WHERE deleted = false ALLOW FILTERING", self.keyspace),
                &[],
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .rows_typed::<CassandraRow>()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        let mut referrers = Vec::new();
        for row in rows {
            let row = row.map_err(|e| Error::StorageUnavailable(e.to_string()))?;
            let record = row.into_record()?;
            if record
                .references
                .iter()
                .any(|r| r.subject == subject && r.version == version)
            {
                referrers.push((record.subject, record.version));
            }
        }
        referrers.sort();
        Ok(referrers)
    }

    async fn set_config(&self, scope: Scope, level: CompatibilityLevel) -> Result<()> {
        let (scope_kind, subject) = scope_kv(&scope);
        self.session
            .query(
                format!(
                    "INSERT INTO {}.configs (scope, subject_name, compatibility_level) VALUES (?, ?, ?)",
                    self.keyspace
                ),
                (scope_kind, subject, level.as_str()),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_config(&self, scope: Scope) -> Result<Option<CompatibilityLevel>> {
        let (scope_kind, subject) = scope_kv(&scope);
        let row = self
            .session
            .query(
                format!(
                    "SELECT compatibility_level FROM {}.configs WHERE scope = ? AND subject_name = ?",
                    self.keyspace
                ),
                (scope_kind, subject),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .maybe_first_row_typed::<(String,)>()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        row.map(|(s,)| CompatibilityLevel::from_str(&s)).transpose()
    }

    async fn delete_config(&self, scope: Scope) -> Result<()> {
        let (scope_kind, subject) = scope_kv(&scope);
        self.session
            .query(
                format!(
                    "DELETE FROM {}.configs WHERE scope = ? AND subject_name = ?",
                    self.keyspace
                ),
                (scope_kind, subject),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn set_mode(&self, scope: Scope, mode: Mode) -> Result<()> {
        let (scope_kind, subject) = scope_kv(&scope);
        self.session
            .query(
                format!(
                    "INSERT INTO {}.modes (scope, subject_name, mode) VALUES (?, ?, ?)",
                    self.keyspace
                ),
                (scope_kind, subject, mode.as_str()),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_mode(&self, scope: Scope) -> Result<Option<Mode>> {
        let (scope_kind, subject) = scope_kv(&scope);
        let row = self
            .session
            .query(
                format!(
                    "SELECT mode FROM {}.modes WHERE scope = ? AND subject_name = ?",
                    self.keyspace
                ),
                (scope_kind, subject),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
            .maybe_first_row_typed::<(String,)>()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        row.map(|(s,)| Mode::from_str(&s)).transpose()
    }

    async fn delete_mode(&self, scope: Scope) -> Result<()> {
        let (scope_kind, subject) = scope_kv(&scope);
        self.session
            .query(
                format!(
                    "DELETE FROM {}.modes WHERE scope = ? AND subject_name = ?",
                    self.keyspace
                ),
                (scope_kind, subject),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn import_schema(&self, record: SchemaRecord) -> Result<SchemaRecord> {
        let existing = self.get_schema_by_id(record.id).await.ok();
        if let Some(existing) = &existing {
            if existing.fingerprint != record.fingerprint {
                return Err(Error::SchemaIdConflict { id: record.id });
            }
        }

        let taken = self
            .get_schema_by_subject_version(&record.subject, record.version)
            .await
            .is_ok();
        if taken {
            return Err(Error::SchemaExists);
        }

        let references_json = serde_json::to_string(&record.references).map_err(|e| {
            Error::InvalidImportRequest(format!("references did not serialize: {e}"))
        })?;

        self.session
            .query(
                format!(
                    r#"
                    INSERT INTO {}.schemas
                        (id, subject, version, schema_type, schema, fingerprint, references, deleted, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, false, ?)
                    "#,
                    self.keyspace
                ),
                (
                    record.id,
                    &record.subject,
                    record.version,
                    record.schema_type.as_str(),
                    &record.schema,
                    &record.fingerprint,
                    references_json,
                    record.created_at,
                ),
            )
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        Ok(record)
    }

    async fn set_next_id(&self, n: SchemaId) -> Result<()> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current: Option<(i64,)> = self
                .session
                .query(
                    format!(
                        "SELECT next_id FROM {}.allocator WHERE name = 'schema_id'",
                        self.keyspace
                    ),
                    &[],
                )
                .await
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?
                .maybe_first_row_typed()
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
            let current_id = current.map(|(v,)| v).unwrap_or(0);
            if current_id >= n {
                return Ok(());
            }
            let applied: (bool,) = self
                .session
                .query(
                    format!(
                        "UPDATE {}.allocator SET next_id = ? WHERE name = 'schema_id' IF next_id = ?",
                        self.keyspace
                    ),
                    (n, current_id),
                )
                .await
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?
                .first_row_typed()
                .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
            if applied.0 {
                return Ok(());
            }
            Self::backoff(attempt).await;
        }
        Err(Error::StorageUnavailable(
            "allocator re-seat did not converge".to_string(),
        ))
    }

    async fn is_healthy(&self) -> bool {
        self.session.query("SELECT now() FROM system.local", &[]).await.is_ok()
    }
}

fn scope_kv(scope: &Scope) -> (&'static str, String) {
    match scope {
        Scope::Global => ("global", String::new()),
        Scope::Subject(subject) => ("subject", subject.clone()),
    }
}

#[derive(scylla::FromRow)]
struct CassandraRow {
    id: SchemaId,
    subject: String,
    version: Version,
    schema_type: String,
    schema: String,
    fingerprint: String,
    references: String,
    deleted: bool,
    created_at: i64,
}

impl CassandraRow {
    fn into_record(self) -> Result<SchemaRecord> {
        let schema_type = SchemaType::from_str(&self.schema_type).unwrap_or(SchemaType::Avro);
        let references: Vec<SchemaReference> =
            serde_json::from_str(&self.references).unwrap_or_default();
        Ok(SchemaRecord {
            id: self.id,
            subject: self.subject,
            version: self.version,
            schema_type,
            schema: self.schema,
            fingerprint: self.fingerprint,
            references,
            deleted: self.deleted,
            created_at: self.created_at,
        })
    }
}
