//! End-to-end scenarios exercising the registry engine against an
//! in-memory backend.

use registry_core::engine::{RegistryConfig, RegistryEngine, VersionSpec};
use registry_core::storage::memory::MemoryBackend;
use registry_core::{CompatibilityLevel, Error, ImportEngine, ImportRequest, SchemaType};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn engine() -> RegistryEngine {
    RegistryEngine::new(Arc::new(MemoryBackend::new()), RegistryConfig::default())
}

#[tokio::test]
async fn basic_round_trip() {
    let engine = engine();
    let record = engine
        .register("foo-value", None, r#"{"type":"string"}"#, vec![], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(record.id, 1);
    assert_eq!(record.version, 1);

    let by_id = engine.get_schema_by_id(1).await.unwrap();
    assert_eq!(by_id.schema, r#"{"type":"string"}"#);

    let subjects = engine.list_subjects(false).await.unwrap();
    assert!(subjects.contains(&"foo-value".to_string()));

    let latest = engine
        .get_schema_by_subject_version("foo-value", VersionSpec::Latest)
        .await
        .unwrap();
    assert_eq!(latest.version, 1);
}

#[tokio::test]
async fn dedupe_returns_the_same_record_twice() {
    let engine = engine();
    let schema = r#"{"type":"record","name":"U","fields":[{"name":"id","type":"int"}]}"#;

    let first = engine.register("foo-value", None, schema, vec![], &CancellationToken::new()).await.unwrap();
    let second = engine.register("foo-value", None, schema, vec![], &CancellationToken::new()).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.version, 1);
    assert_eq!(second.version, 1);

    let versions = engine
        .get_versions_by_schema_id(first.id, false)
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);
}

#[tokio::test]
async fn backward_compatible_evolution_is_accepted() {
    let engine = engine();
    engine
        .set_config(Some("foo-value"), CompatibilityLevel::Backward)
        .await
        .unwrap();

    let v1 = engine
        .register(
            "foo-value",
            None,
            r#"{"type":"record","name":"U","fields":[{"name":"id","type":"int"}]}"#,
            vec![],
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let v2 = engine
        .register(
            "foo-value",
            None,
            r#"{"type":"record","name":"U","fields":[{"name":"id","type":"int"},{"name":"name","type":["null","string"],"default":null}]}"#,
            vec![],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(v1.version, 1);
    assert_eq!(v2.version, 2);
    assert!(v2.id > v1.id);
}

#[tokio::test]
async fn incompatible_change_is_rejected_without_advancing_state() {
    let engine = engine();
    engine
        .set_config(Some("foo-value"), CompatibilityLevel::Backward)
        .await
        .unwrap();

    engine
        .register(
            "foo-value",
            None,
            r#"{"type":"record","name":"U","fields":[{"name":"id","type":"int"}]}"#,
            vec![],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let err = engine
        .register(
            "foo-value",
            None,
            r#"{"type":"record","name":"U","fields":[{"name":"other","type":"string"}]}"#,
            vec![],
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IncompatibleSchema { .. }));

    let versions = engine
        .get_schemas_by_subject("foo-value", false)
        .await
        .unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, 1);

    let next = engine
        .register("other-value", None, r#"{"type":"boolean"}"#, vec![], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(next.id, versions[0].id + 1);
}

#[tokio::test]
async fn import_preserves_ids_and_reseats_the_allocator() {
    let engine = engine();
    engine
        .set_mode(None, registry_core::Mode::Import)
        .await
        .unwrap();
    let importer = ImportEngine::new(&engine);

    let outcomes = importer
        .import_schemas(vec![
            ImportRequest {
                id: 100,
                subject: "s".to_string(),
                version: 1,
                schema_type: SchemaType::Avro,
                schema_text: r#"{"type":"string"}"#.to_string(),
                references: vec![],
            },
            ImportRequest {
                id: 200,
                subject: "s".to_string(),
                version: 2,
                schema_type: SchemaType::Avro,
                schema_text: r#"{"type":"int"}"#.to_string(),
                references: vec![],
            },
        ], &CancellationToken::new())
        .await
        .unwrap();

    for outcome in &outcomes {
        assert!(matches!(outcome, registry_core::ImportOutcome::Imported(_)));
    }

    engine.set_mode(None, registry_core::Mode::ReadWrite).await.unwrap();
    let record = engine
        .register("fresh-subject", None, r#"{"type":"boolean"}"#, vec![], &CancellationToken::new())
        .await
        .unwrap();
    assert!(record.id > 200);
}

#[tokio::test]
async fn default_and_prod_contexts_keep_independent_subjects() {
    let engine = engine();
    let default_record = engine
        .register("foo", None, r#"{"type":"string"}"#, vec![], &CancellationToken::new())
        .await
        .unwrap();
    let prod_record = engine
        .register(":.prod:foo", None, r#"{"type":"int"}"#, vec![], &CancellationToken::new())
        .await
        .unwrap();

    assert_ne!(default_record.id, prod_record.id);
    assert_eq!(default_record.version, 1);
    assert_eq!(prod_record.version, 1);

    let resolved_default = engine
        .get_schema_by_subject_version("foo", VersionSpec::Latest)
        .await
        .unwrap();
    let resolved_prod = engine
        .get_schema_by_subject_version(":.prod:foo", VersionSpec::Latest)
        .await
        .unwrap();
    assert_eq!(resolved_default.id, default_record.id);
    assert_eq!(resolved_prod.id, prod_record.id);
}
