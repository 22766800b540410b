//! Property tests for the registration/versioning/dedupe/import invariants.

use proptest::prelude::*;
use registry_core::engine::{RegistryConfig, RegistryEngine};
use registry_core::import::{ImportEngine, ImportRequest};
use registry_core::parser::ParsedSchema;
use registry_core::storage::memory::MemoryBackend;
use registry_core::{CompatibilityLevel, Mode, SchemaType};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn rt() -> Runtime {
    Runtime::new().unwrap()
}

fn fresh_engine() -> RegistryEngine {
    RegistryEngine::new(Arc::new(MemoryBackend::new()), RegistryConfig::default())
}

fn field_schema(field_names: &[String]) -> String {
    let fields: Vec<String> = field_names
        .iter()
        .map(|name| format!(r#"{{"name":"{name}","type":"string"}}"#))
        .collect();
    format!(r#"{{"type":"record","name":"R","fields":[{}]}}"#, fields.join(","))
}

proptest! {
    /// Versions assigned to a run of successful registrations into one
    /// subject are exactly `1..N` with no gaps.
    #[test]
    fn versions_are_dense_within_a_subject(n_schemas in 1usize..12) {
        let engine = fresh_engine();
        let runtime = rt();
        runtime.block_on(engine.set_config(None, CompatibilityLevel::None)).unwrap();

        let mut versions = Vec::new();
        for i in 0..n_schemas {
            let schema = field_schema(&[format!("f{i}")]);
            let record = runtime
                .block_on(engine.register("s", None, &schema, vec![], &CancellationToken::new()))
                .unwrap();
            versions.push(record.version);
        }
        let expected: Vec<i64> = (1..=n_schemas as i64).collect();
        prop_assert_eq!(versions, expected);
    }

    /// Registering identical text twice with nothing else happening in
    /// between returns the same (id, version) both times.
    #[test]
    fn duplicate_registration_is_idempotent(text in "[a-z]{1,8}") {
        let engine = fresh_engine();
        let runtime = rt();
        let schema = format!(r#"{{"type":"record","name":"R","fields":[{{"name":"{text}","type":"string"}}]}}"#);

        let first = runtime.block_on(engine.register("s", None, &schema, vec![], &CancellationToken::new())).unwrap();
        let second = runtime.block_on(engine.register("s", None, &schema, vec![], &CancellationToken::new())).unwrap();
        prop_assert_eq!(first.id, second.id);
        prop_assert_eq!(first.version, second.version);
    }

    /// Two schema texts with the same canonical form fingerprint
    /// identically regardless of whitespace/key-order differences.
    #[test]
    fn canonical_equivalents_share_a_fingerprint(field in "[a-z]{1,6}") {
        let compact = format!(r#"{{"type":"record","name":"R","fields":[{{"name":"{field}","type":"string"}}]}}"#);
        let spaced = format!(
            r#"{{ "fields" : [ {{ "type" : "string" , "name" : "{field}" }} ] , "name": "R", "type": "record" }}"#
        );
        let a = registry_core::parser::parse(SchemaType::Avro, &compact, &[], &[]).unwrap();
        let b = registry_core::parser::parse(SchemaType::Avro, &spaced, &[], &[]).unwrap();
        prop_assert_eq!(a.fingerprint(), b.fingerprint());
    }
}

#[test]
fn permanent_subject_deletion_removes_it_from_listing() {
    let engine = fresh_engine();
    let runtime = rt();
    runtime
        .block_on(engine.register("s", None, r#"{"type":"string"}"#, vec![], &CancellationToken::new()))
        .unwrap();
    runtime.block_on(engine.delete_subject("s", true)).unwrap();
    let subjects = runtime.block_on(engine.list_subjects(false)).unwrap();
    assert!(!subjects.contains(&"s".to_string()));
}

#[test]
fn soft_deleted_version_is_hidden_but_not_reused() {
    let engine = fresh_engine();
    let runtime = rt();
    runtime.block_on(engine.set_config(None, CompatibilityLevel::None)).unwrap();
    runtime
        .block_on(engine.register("s", None, r#"{"type":"string"}"#, vec![], &CancellationToken::new()))
        .unwrap();
    runtime.block_on(engine.delete_schema("s", 1, false)).unwrap();

    let live = runtime.block_on(engine.get_schemas_by_subject("s", false)).unwrap();
    assert!(live.is_empty());
    let all = runtime.block_on(engine.get_schemas_by_subject("s", true)).unwrap();
    assert_eq!(all.len(), 1);

    let next = runtime
        .block_on(engine.register("s", None, r#"{"type":"int"}"#, vec![], &CancellationToken::new()))
        .unwrap();
    assert_eq!(next.version, 2);
}

#[tokio::test]
async fn registration_after_import_always_exceeds_the_imported_max() {
    let engine = fresh_engine();
    engine.set_mode(None, Mode::Import).await.unwrap();
    let importer = ImportEngine::new(&engine);
    importer
        .import_schemas(vec![ImportRequest {
            id: 500,
            subject: "s".to_string(),
            version: 1,
            schema_type: SchemaType::Avro,
            schema_text: r#"{"type":"string"}"#.to_string(),
            references: vec![],
        }], &CancellationToken::new())
        .await
        .unwrap();

    engine.set_mode(None, Mode::ReadWrite).await.unwrap();
    let record = engine
        .register("other", None, r#"{"type":"int"}"#, vec![], &CancellationToken::new())
        .await
        .unwrap();
    assert!(record.id > 500);
}

#[tokio::test]
async fn check_compatibility_verdict_matches_registration_outcome() {
    let engine = fresh_engine();
    engine
        .register(
            "s",
            None,
            r#"{"type":"record","name":"R","fields":[{"name":"a","type":"string"}]}"#,
            vec![],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let incompatible_schema =
        r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"}]}"#;
    let verdict = engine
        .check_compatibility(
            "s",
            None,
            incompatible_schema,
            vec![],
            registry_core::engine::VersionSpec::Latest,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(!verdict.is_compatible);

    let err = engine
        .register("s", None, incompatible_schema, vec![], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, registry_core::Error::IncompatibleSchema { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_distinct_schemas_get_contiguous_versions_and_distinct_ids() {
    let engine = Arc::new(fresh_engine());
    engine.set_config(None, CompatibilityLevel::None).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let schema = format!(r#"{{"type":"record","name":"R","fields":[{{"name":"f{i}","type":"string"}}]}}"#);
            engine.register("s", None, &schema, vec![], &CancellationToken::new()).await.unwrap()
        }));
    }
    let mut records = Vec::new();
    for handle in handles {
        records.push(handle.await.unwrap());
    }

    let mut ids: Vec<_> = records.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 16);

    let mut versions: Vec<_> = records.iter().map(|r| r.version).collect();
    versions.sort_unstable();
    assert_eq!(versions, (1..=16).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_schemas_collapse_to_one_record() {
    let engine = Arc::new(fresh_engine());
    let schema = r#"{"type":"string"}"#;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine.register("s", None, schema, vec![], &CancellationToken::new()).await.unwrap()
        }));
    }
    let mut records = Vec::new();
    for handle in handles {
        records.push(handle.await.unwrap());
    }

    let first = &records[0];
    for record in &records {
        assert_eq!(record.id, first.id);
        assert_eq!(record.version, first.version);
    }
    let all = engine.get_schemas_by_subject("s", true).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_across_subjects_yield_globally_unique_ids() {
    let engine = Arc::new(fresh_engine());

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let subject = format!("s{i}");
            engine
                .register(&subject, None, r#"{"type":"string"}"#, vec![], &CancellationToken::new())
                .await
                .unwrap()
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().id);
    }
    ids.sort_unstable();
    let before_dedup = ids.len();
    ids.dedup();
    assert_eq!(ids.len(), before_dedup);
}
