//! Performance benchmarks for registry-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use registry_core::engine::{RegistryConfig, RegistryEngine};
use registry_core::storage::memory::MemoryBackend;
use registry_core::SchemaType;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn avro_record_schema(n_fields: usize) -> String {
    let fields: Vec<String> = (0..n_fields)
        .map(|i| format!(r#"{{"name":"f{i}","type":"string"}}"#))
        .collect();
    format!(
        r#"{{"type":"record","name":"Bench","fields":[{}]}}"#,
        fields.join(",")
    )
}

fn bench_registration(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("registration");

    group.bench_function("register_new_subject", |b| {
        let engine = RegistryEngine::new(Arc::new(MemoryBackend::new()), RegistryConfig::default());
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let subject = format!("subject-{n}");
            let schema = avro_record_schema(3);
            rt.block_on(engine.register(black_box(&subject), Some(SchemaType::Avro), black_box(&schema), vec![], &CancellationToken::new()))
                .unwrap()
        })
    });

    group.bench_function("register_duplicate_dedupes", |b| {
        let engine = RegistryEngine::new(Arc::new(MemoryBackend::new()), RegistryConfig::default());
        let schema = avro_record_schema(3);
        rt.block_on(engine.register("subject-dup", Some(SchemaType::Avro), &schema, vec![], &CancellationToken::new()))
            .unwrap();
        b.iter(|| {
            rt.block_on(engine.register(black_box("subject-dup"), Some(SchemaType::Avro), black_box(&schema), vec![], &CancellationToken::new()))
                .unwrap()
        })
    });

    group.finish();
}

fn bench_compatibility_check(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("compatibility");

    for n_versions in [1, 10, 50].iter() {
        group.bench_with_input(
            BenchmarkId::new("backward_transitive", n_versions),
            n_versions,
            |b, &n_versions| {
                let engine =
                    RegistryEngine::new(Arc::new(MemoryBackend::new()), RegistryConfig::default());
                let subject = format!("subject-history-{n_versions}");
                rt.block_on(
                    engine.set_config(Some(&subject), registry_core::CompatibilityLevel::BackwardTransitive),
                )
                .unwrap();

                for i in 0..n_versions {
                    let schema = avro_record_schema(i + 1);
                    rt.block_on(engine.register(&subject, Some(SchemaType::Avro), &schema, vec![], &CancellationToken::new()))
                        .unwrap();
                }

                let candidate = avro_record_schema(n_versions + 1);
                b.iter(|| {
                    rt.block_on(engine.check_compatibility(
                        black_box(&subject),
                        Some(SchemaType::Avro),
                        black_box(&candidate),
                        vec![],
                        registry_core::engine::VersionSpec::All,
                        &CancellationToken::new(),
                    ))
                    .unwrap()
                })
            },
        );
    }

    group.finish();
}

fn bench_fingerprinting(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprinting");

    group.bench_function("avro_parse_and_fingerprint", |b| {
        let schema = avro_record_schema(20);
        b.iter(|| {
            let parsed =
                registry_core::parser::parse(SchemaType::Avro, black_box(&schema), &[], &[]).unwrap();
            black_box(parsed.fingerprint())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_registration,
    bench_compatibility_check,
    bench_fingerprinting,
);
criterion_main!(benches);
