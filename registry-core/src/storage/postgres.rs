//! Relational backend: every operation below is one serializable database
//! transaction. Fingerprint uniqueness within a subject is enforced by
//! a unique index on `(subject, fingerprint)` where `deleted = false`;
//! globally unique schema IDs come from a dedicated sequence.

use super::{Scope, StorageBackend};
use crate::compatibility::CompatibilityLevel;
use crate::error::{Error, Result};
use crate::record::{Mode, SchemaId, SchemaRecord, SchemaReference, SchemaType, Version};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::str::FromStr;

/// A [`StorageBackend`] backed by PostgreSQL.
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage_err(e: sqlx::Error) -> Error {
    Error::StorageUnavailable(e.to_string())
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> std::result::Result<SchemaRecord, sqlx::Error> {
    let schema_type_str: String = row.try_get("schema_type")?;
    let schema_type =
        SchemaType::from_str(&schema_type_str).unwrap_or(SchemaType::Avro);
    let references_json: serde_json::Value = row.try_get("schema_references")?;
    let references: Vec<SchemaReference> =
        serde_json::from_value(references_json).unwrap_or_default();

    Ok(SchemaRecord {
        id: row.try_get("id")?,
        subject: row.try_get("subject")?,
        version: row.try_get("version")?,
        schema_type,
        schema: row.try_get("schema")?,
        fingerprint: row.try_get("fingerprint")?,
        references,
        deleted: row.try_get("deleted")?,
        created_at: row.try_get("created_at")?,
    })
}

fn scope_key(scope: &Scope) -> (String, Option<String>) {
    match scope {
        Scope::Global => ("global".to_string(), None),
        Scope::Subject(subject) => ("subject".to_string(), Some(subject.clone())),
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    async fn create_schema(&self, record: SchemaRecord) -> Result<SchemaRecord> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let existing = sqlx::query(
            "SELECT 1 FROM schemas WHERE subject = $1 AND fingerprint = $2 AND deleted = false",
        )
        .bind(&record.subject)
        .bind(&record.fingerprint)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;
        if existing.is_some() {
            return Err(Error::SchemaExists);
        }

        let id: SchemaId = sqlx::query_scalar("SELECT nextval('schema_id_seq')")
            .fetch_one(&mut *tx)
            .await
            .map_err(storage_err)?;

        let version: Version = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM schemas WHERE subject = $1",
        )
        .bind(&record.subject)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_err)?;

        let references_json = serde_json::to_value(&record.references).map_err(|e| {
            Error::InvalidSchema(format!("references did not serialize: {e}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO schemas (
                id, subject, version, schema_type, schema, fingerprint,
                schema_references, deleted, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, false, $8)
            "#,
        )
        .bind(id)
        .bind(&record.subject)
        .bind(version)
        .bind(record.schema_type.as_str())
        .bind(&record.schema)
        .bind(&record.fingerprint)
        .bind(&references_json)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        Ok(SchemaRecord {
            id,
            version,
            ..record
        })
    }

    async fn get_schema_by_id(&self, id: SchemaId) -> Result<SchemaRecord> {
        sqlx::query("SELECT * FROM schemas WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .map(|row| row_to_record(&row).map_err(storage_err))
            .transpose()?
            .ok_or_else(|| Error::SchemaNotFound(id.to_string()))
    }

    async fn get_schema_by_subject_version(
        &self,
        subject: &str,
        version: Version,
    ) -> Result<SchemaRecord> {
        sqlx::query("SELECT * FROM schemas WHERE subject = $1 AND version = $2")
            .bind(subject)
            .bind(version)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .map(|row| row_to_record(&row).map_err(storage_err))
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
        let query = if include_deleted {
            "SELECT * FROM schemas WHERE subject = $1 AND fingerprint = $2"
        } else {
            "SELECT * FROM schemas WHERE subject = $1 AND fingerprint = $2 AND deleted = false"
        };
        sqlx::query(query)
            .bind(subject)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .map(|row| row_to_record(&row).map_err(storage_err))
            .transpose()?
            .ok_or_else(|| Error::SchemaNotFound(fingerprint.to_string()))
    }

    async fn get_latest_schema(&self, subject: &str) -> Result<SchemaRecord> {
        sqlx::query(
            "SELECT * FROM schemas WHERE subject = $1 AND deleted = false ORDER BY version DESC LIMIT 1",
        )
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?
        .map(|row| row_to_record(&row).map_err(storage_err))
        .transpose()?
        .ok_or_else(|| Error::SubjectNotFound(subject.to_string()))
    }

    async fn get_schemas_by_subject(
        &self,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<SchemaRecord>> {
        let query = if include_deleted {
            "SELECT * FROM schemas WHERE subject = $1 ORDER BY version"
        } else {
            "SELECT * FROM schemas WHERE subject = $1 AND deleted = false ORDER BY version"
        };
        let rows = sqlx::query(query)
            .bind(subject)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        if rows.is_empty() {
            return Err(Error::SubjectNotFound(subject.to_string()));
        }
        rows.iter()
            .map(|row| row_to_record(row).map_err(storage_err))
            .collect()
    }

    async fn list_subjects(&self, include_deleted: bool) -> Result<Vec<String>> {
        let query = if include_deleted {
            "SELECT DISTINCT subject FROM schemas ORDER BY subject"
        } else {
            "SELECT DISTINCT subject FROM schemas WHERE deleted = false ORDER BY subject"
        };
        let rows = sqlx::query_scalar(query)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(rows)
    }

    async fn get_subjects_by_schema_id(
        &self,
        id: SchemaId,
        include_deleted: bool,
    ) -> Result<Vec<String>> {
        let query = if include_deleted {
            "SELECT DISTINCT subject FROM schemas WHERE id = $1 ORDER BY subject"
        } else {
            "SELECT DISTINCT subject FROM schemas WHERE id = $1 AND deleted = false ORDER BY subject"
        };
        sqlx::query_scalar(query)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)
    }

    async fn get_versions_by_schema_id(
        &self,
        id: SchemaId,
        include_deleted: bool,
    ) -> Result<Vec<Version>> {
        let query = if include_deleted {
            "SELECT version FROM schemas WHERE id = $1 ORDER BY version"
        } else {
            "SELECT version FROM schemas WHERE id = $1 AND deleted = false ORDER BY version"
        };
        sqlx::query_scalar(query)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)
    }

    async fn delete_schema(&self, subject: &str, version: Version, permanent: bool) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let referenced: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM schemas
            WHERE deleted = false
              AND EXISTS (
                SELECT 1 FROM jsonb_array_elements(schema_references) AS r
                WHERE (r->>'subject') = $1 AND (r->>'version')::bigint = $2
              )
            "#,
        )
        .bind(subject)
        .bind(version)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_err)?;

        let affected = if permanent {
            if referenced > 0 {
                return Err(Error::ReferencedByOther(referenced as usize));
            }
            sqlx::query("DELETE FROM schemas WHERE subject = $1 AND version = $2")
                .bind(subject)
                .bind(version)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?
        } else {
            sqlx::query("UPDATE schemas SET deleted = true WHERE subject = $1 AND version = $2")
                .bind(subject)
                .bind(version)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?
        };

        if affected.rows_affected() == 0 {
            return Err(Error::VersionNotFound {
                subject: subject.to_string(),
                version,
            });
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn delete_subject(&self, subject: &str, permanent: bool) -> Result<Vec<Version>> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let versions: Vec<Version> =
            sqlx::query_scalar("SELECT version FROM schemas WHERE subject = $1 ORDER BY version")
                .bind(subject)
                .fetch_all(&mut *tx)
                .await
                .map_err(storage_err)?;
        if versions.is_empty() {
            return Err(Error::SubjectNotFound(subject.to_string()));
        }

        if permanent {
            let referenced: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM schemas
                WHERE deleted = false AND subject != $1
                  AND EXISTS (
                    SELECT 1 FROM jsonb_array_elements(schema_references) AS r
                    WHERE (r->>'subject') = $1
                  )
                "#,
            )
            .bind(subject)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage_err)?;
            if referenced > 0 {
                return Err(Error::ReferencedByOther(referenced as usize));
            }

            sqlx::query("DELETE FROM schemas WHERE subject = $1")
                .bind(subject)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
            sqlx::query("DELETE FROM configs WHERE scope = 'subject' AND subject_name = $1")
                .bind(subject)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
            sqlx::query("DELETE FROM modes WHERE scope = 'subject' AND subject_name = $1")
                .bind(subject)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        } else {
            sqlx::query("UPDATE schemas SET deleted = true WHERE subject = $1")
                .bind(subject)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(versions)
    }

    async fn get_referenced_by(
        &self,
        subject: &str,
        version: Version,
    ) -> Result<Vec<(String, Version)>> {
        let rows = sqlx::query(
            r#"
            SELECT subject, version FROM schemas
            WHERE deleted = false
              AND EXISTS (
                SELECT 1 FROM jsonb_array_elements(schema_references) AS r
                WHERE (r->>'subject') = $1 AND (r->>'version')::bigint = $2
              )
            ORDER BY subject, version
            "#,
        )
        .bind(subject)
        .bind(version)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get::<String, _>("subject").map_err(storage_err)?,
                    row.try_get::<Version, _>("version").map_err(storage_err)?,
                ))
            })
            .collect()
    }

    async fn set_config(&self, scope: Scope, level: CompatibilityLevel) -> Result<()> {
        let (scope_kind, subject) = scope_key(&scope);
        sqlx::query(
            r#"
            INSERT INTO configs (scope, subject_name, compatibility_level)
            VALUES ($1, $2, $3)
            ON CONFLICT (scope, subject_name) DO UPDATE SET compatibility_level = EXCLUDED.compatibility_level
            "#,
        )
        .bind(scope_kind)
        .bind(subject)
        .bind(level.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_config(&self, scope: Scope) -> Result<Option<CompatibilityLevel>> {
        let (scope_kind, subject) = scope_key(&scope);
        let row: Option<String> = sqlx::query_scalar(
            "SELECT compatibility_level FROM configs WHERE scope = $1 AND subject_name IS NOT DISTINCT FROM $2",
        )
        .bind(scope_kind)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.map(|s| CompatibilityLevel::from_str(&s)).transpose()
    }

    async fn delete_config(&self, scope: Scope) -> Result<()> {
        let (scope_kind, subject) = scope_key(&scope);
        sqlx::query("DELETE FROM configs WHERE scope = $1 AND subject_name IS NOT DISTINCT FROM $2")
            .bind(scope_kind)
            .bind(subject)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn set_mode(&self, scope: Scope, mode: Mode) -> Result<()> {
        let (scope_kind, subject) = scope_key(&scope);
        sqlx::query(
            r#"
            INSERT INTO modes (scope, subject_name, mode)
            VALUES ($1, $2, $3)
            ON CONFLICT (scope, subject_name) DO UPDATE SET mode = EXCLUDED.mode
            "#,
        )
        .bind(scope_kind)
        .bind(subject)
        .bind(mode.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_mode(&self, scope: Scope) -> Result<Option<Mode>> {
        let (scope_kind, subject) = scope_key(&scope);
        let row: Option<String> = sqlx::query_scalar(
            "SELECT mode FROM modes WHERE scope = $1 AND subject_name IS NOT DISTINCT FROM $2",
        )
        .bind(scope_kind)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.map(|s| Mode::from_str(&s)).transpose()
    }

    async fn delete_mode(&self, scope: Scope) -> Result<()> {
        let (scope_kind, subject) = scope_key(&scope);
        sqlx::query("DELETE FROM modes WHERE scope = $1 AND subject_name IS NOT DISTINCT FROM $2")
            .bind(scope_kind)
            .bind(subject)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn import_schema(&self, record: SchemaRecord) -> Result<SchemaRecord> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let existing_fingerprint: Option<String> =
            sqlx::query_scalar("SELECT fingerprint FROM schemas WHERE id = $1")
                .bind(record.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_err)?;
        if let Some(fp) = existing_fingerprint {
            if fp != record.fingerprint {
                return Err(Error::SchemaIdConflict { id: record.id });
            }
        }

        let taken: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM schemas WHERE subject = $1 AND version = $2",
        )
        .bind(&record.subject)
        .bind(record.version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;
        if taken.is_some() {
            return Err(Error::SchemaExists);
        }

        let references_json = serde_json::to_value(&record.references).map_err(|e| {
            Error::InvalidImportRequest(format!("references did not serialize: {e}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO schemas (
                id, subject, version, schema_type, schema, fingerprint,
                schema_references, deleted, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, false, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.subject)
        .bind(record.version)
        .bind(record.schema_type.as_str())
        .bind(&record.schema)
        .bind(&record.fingerprint)
        .bind(&references_json)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(record)
    }

    async fn set_next_id(&self, n: SchemaId) -> Result<()> {
        sqlx::query("SELECT setval('schema_id_seq', $1 - 1, true) WHERE $1 > (SELECT last_value FROM schema_id_seq)")
            .bind(n)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}
