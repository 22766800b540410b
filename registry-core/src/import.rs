//! Bulk-inserts schemas with externally-assigned IDs and re-seats the
//! allocator so future registrations never collide with an imported ID.

use crate::engine::RegistryEngine;
use crate::error::{Error, Result};
use crate::parser::{self, ReferencedSchema};
use crate::record::{Mode, SchemaId, SchemaReference, SchemaRecord, SchemaType, Version};
use crate::storage::Scope;
use tokio_util::sync::CancellationToken;

/// One element of an `ImportSchemas` batch.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub id: SchemaId,
    pub subject: String,
    pub version: Version,
    pub schema_type: SchemaType,
    pub schema_text: String,
    pub references: Vec<SchemaReference>,
}

/// Per-element outcome of an import batch.
#[derive(Debug, Clone)]
pub enum ImportOutcome {
    Imported(SchemaRecord),
    Conflict(Error),
}

/// Wraps a [`RegistryEngine`] to admit [`ImportRequest`] batches without
/// running compatibility checks.
pub struct ImportEngine<'a> {
    engine: &'a RegistryEngine,
}

impl<'a> ImportEngine<'a> {
    pub fn new(engine: &'a RegistryEngine) -> Self {
        Self { engine }
    }

    /// `ImportSchemas([request])`. Validates, parses, and inserts each
    /// element in order; a single element failing does not abort the rest
    /// of the batch. After the batch, re-seats the allocator above the
    /// highest successfully-imported ID.
    pub async fn import_schemas(
        &self,
        requests: Vec<ImportRequest>,
        token: &CancellationToken,
    ) -> Result<Vec<ImportOutcome>> {
        let mut outcomes = Vec::with_capacity(requests.len());
        let mut max_imported_id: Option<SchemaId> = None;

        for request in requests {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.import_one(&request).await {
                Ok(record) => {
                    max_imported_id = Some(max_imported_id.map_or(record.id, |m| m.max(record.id)));
                    outcomes.push(ImportOutcome::Imported(record));
                }
                Err(e) => outcomes.push(ImportOutcome::Conflict(e)),
            }
        }

        if let Some(max_id) = max_imported_id {
            self.engine.backend().set_next_id(max_id + 1).await?;
        }

        Ok(outcomes)
    }

    async fn import_one(&self, request: &ImportRequest) -> Result<SchemaRecord> {
        if request.id <= 0 {
            return Err(Error::InvalidImportRequest("id must be positive".to_string()));
        }
        if request.version <= 0 {
            return Err(Error::InvalidImportRequest(
                "version must be positive".to_string(),
            ));
        }
        if request.subject.trim().is_empty() {
            return Err(Error::InvalidImportRequest("subject must not be empty".to_string()));
        }
        if request.schema_text.trim().is_empty() {
            return Err(Error::InvalidImportRequest(
                "schema text must not be empty".to_string(),
            ));
        }

        let (context, subject) = self.engine.contexts().resolve_subject(&request.subject);
        if self.engine.contexts().is_global_context(&context) {
            return Err(Error::GlobalContextForbidden);
        }
        let qualified = self.engine.contexts().format_subject(&context, &subject);

        let mode = self
            .engine
            .backend()
            .get_mode(Scope::Subject(qualified.clone()))
            .await?
            .or(self.engine.backend().get_mode(Scope::Global).await?)
            .unwrap_or(Mode::ReadWrite);
        if mode != Mode::Import {
            return Err(Error::ModeForbidden);
        }

        let mut resolved = Vec::with_capacity(request.references.len());
        for reference in &request.references {
            let ref_qualified = self
                .engine
                .contexts()
                .format_subject(&context, &reference.subject);
            let record = self
                .engine
                .backend()
                .get_schema_by_subject_version(&ref_qualified, reference.version)
                .await
                .map_err(|_| Error::UnresolvedReference {
                    subject: reference.subject.clone(),
                    version: reference.version,
                })?;
            resolved.push(ReferencedSchema {
                name: reference.name.clone(),
                schema: record.schema,
            });
        }

        let parsed = parser::parse(
            request.schema_type,
            &request.schema_text,
            &request.references,
            &resolved,
        )?;

        let record = SchemaRecord::new(
            request.id,
            qualified,
            request.version,
            request.schema_type,
            request.schema_text.clone(),
            parsed.fingerprint(),
            request.references.clone(),
            now_millis(),
        );

        self.engine.backend().import_schema(record).await
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RegistryConfig;
    use crate::storage::memory::MemoryBackend;
    use std::sync::Arc;

    async fn engine_in_import_mode() -> RegistryEngine {
        let engine = RegistryEngine::new(Arc::new(MemoryBackend::new()), RegistryConfig::default());
        engine.set_mode(None, Mode::Import).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn import_preserves_caller_supplied_ids() {
        let engine = engine_in_import_mode().await;
        let importer = ImportEngine::new(&engine);
        let outcomes = importer
            .import_schemas(vec![ImportRequest {
                id: 42,
                subject: "foo-value".to_string(),
                version: 7,
                schema_type: SchemaType::Avro,
                schema_text: r#"{"type":"string"}"#.to_string(),
                references: vec![],
            }], &CancellationToken::new())
            .await
            .unwrap();
        match &outcomes[0] {
            ImportOutcome::Imported(record) => {
                assert_eq!(record.id, 42);
                assert_eq!(record.version, 7);
            }
            ImportOutcome::Conflict(e) => panic!("expected import to succeed, got {e:?}"),
        }
    }

    #[tokio::test]
    async fn import_reseats_allocator_above_max_imported_id() {
        let engine = engine_in_import_mode().await;
        let importer = ImportEngine::new(&engine);
        importer
            .import_schemas(vec![ImportRequest {
                id: 100,
                subject: "foo-value".to_string(),
                version: 1,
                schema_type: SchemaType::Avro,
                schema_text: r#"{"type":"string"}"#.to_string(),
                references: vec![],
            }], &CancellationToken::new())
            .await
            .unwrap();

        engine.set_mode(None, Mode::ReadWrite).await.unwrap();
        let record = engine
            .register("bar-value", None, r#"{"type":"int"}"#, vec![], &CancellationToken::new())
            .await
            .unwrap();
        assert!(record.id > 100);
    }

    #[tokio::test]
    async fn import_requires_import_mode() {
        let engine = RegistryEngine::new(Arc::new(MemoryBackend::new()), RegistryConfig::default());
        let importer = ImportEngine::new(&engine);
        let outcomes = importer
            .import_schemas(vec![ImportRequest {
                id: 1,
                subject: "foo-value".to_string(),
                version: 1,
                schema_type: SchemaType::Avro,
                schema_text: r#"{"type":"string"}"#.to_string(),
                references: vec![],
            }], &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcomes[0], ImportOutcome::Conflict(Error::ModeForbidden)));
    }

    #[tokio::test]
    async fn import_rejects_nonpositive_id() {
        let engine = engine_in_import_mode().await;
        let importer = ImportEngine::new(&engine);
        let outcomes = importer
            .import_schemas(vec![ImportRequest {
                id: 0,
                subject: "foo-value".to_string(),
                version: 1,
                schema_type: SchemaType::Avro,
                schema_text: r#"{"type":"string"}"#.to_string(),
                references: vec![],
            }], &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcomes[0],
            ImportOutcome::Conflict(Error::InvalidImportRequest(_))
        ));
    }

    #[tokio::test]
    async fn import_batch_observes_cancellation_before_any_element() {
        let engine = engine_in_import_mode().await;
        let importer = ImportEngine::new(&engine);
        let token = CancellationToken::new();
        token.cancel();
        let err = importer
            .import_schemas(
                vec![ImportRequest {
                    id: 1,
                    subject: "foo-value".to_string(),
                    version: 1,
                    schema_type: SchemaType::Avro,
                    schema_text: r#"{"type":"string"}"#.to_string(),
                    references: vec![],
                }],
                &token,
            )
            .await
            .unwrap_err();
        assert_eq!(err, Error::Cancelled);
    }
}
