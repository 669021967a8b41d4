//! Criterion benchmarks for indexing and query execution
//!
//! These benchmarks measure:
//! - Query parsing
//! - Batch indexing through the index manager
//! - Term, prefix and fuzzy searches over a fixed corpus

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use entity_search::search::{
    parse_query, EntityRecord, EntitySearchDescriptor, FieldDescriptor, FieldValue, FieldValues,
    IndexMode, NumericKind, SchemaRegistry, SearchConfig, SearchRequest, SearchService,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

const WORDS: &[&str] = &[
    "lucene", "action", "rust", "search", "index", "query", "engine", "vector", "token", "phrase",
    "prefix", "fuzzy", "segment", "commit", "reader", "writer",
];

fn registry() -> Arc<SchemaRegistry> {
    let descriptor = EntitySearchDescriptor::values_builder("Doc")
        .field(FieldDescriptor::value("Title", "Title").boost(2.0).stored())
        .field(FieldDescriptor::value("Body", "Body"))
        .field(FieldDescriptor::value("Rank", "Rank").numeric(NumericKind::Int64))
        .build()
        .unwrap();
    SchemaRegistry::builder().register(descriptor).unwrap().build()
}

fn corpus(size: usize) -> Vec<EntityRecord> {
    (0..size)
        .map(|i| {
            let word = |k: usize| WORDS[(i * 7 + k * 3) % WORDS.len()];
            let mut values = FieldValues::new();
            values.insert("Id".to_string(), FieldValue::from(i.to_string()));
            values.insert(
                "Title".to_string(),
                FieldValue::from(format!("{} {}", word(0), word(1))),
            );
            values.insert(
                "Body".to_string(),
                FieldValue::from((2..12).map(word).collect::<Vec<_>>().join(" ")),
            );
            values.insert("Rank".to_string(), FieldValue::from(i as i64));
            EntityRecord::values(values)
        })
        .collect()
}

/// Benchmark free-text query parsing
fn bench_parse_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_query");
    for query in [
        "lucene",
        "+lucene -java \"in action\"",
        "Title:rust AND (engine OR index*) NOT Body:\"slow reader\"",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(query), query, |b, q| {
            b.iter(|| parse_query(black_box(q)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark batch indexing
fn bench_index_range(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("index_range");
    group.sample_size(10);

    for size in [100, 1_000] {
        let records = corpus(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &records, |b, records| {
            b.to_async(&runtime).iter(|| async {
                let service = SearchService::new(SearchConfig::default(), registry())
                    .await
                    .unwrap();
                service
                    .index_manager()
                    .index_range("Doc", records, IndexMode::Replace, None)
                    .await
                    .unwrap()
            });
        });
    }
    group.finish();
}

/// Benchmark searches over a 5k document corpus
fn bench_search(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let service = runtime.block_on(async {
        let service = SearchService::new(SearchConfig::default(), registry())
            .await
            .unwrap();
        service.index_records("Doc", &corpus(5_000)).await.unwrap();
        service
    });

    let requests = [
        ("term", SearchRequest::new("lucene")),
        ("boolean", SearchRequest::new("+rust engine -fuzzy")),
        ("prefix", SearchRequest::new("seg").with_prefix(true)),
        ("fuzzy", SearchRequest::new("lucine").with_fuzzy(Some(1))),
        ("phrase", SearchRequest::new("\"search index\"")),
    ];

    let mut group = c.benchmark_group("search");
    for (name, request) in &requests {
        group.bench_with_input(BenchmarkId::from_parameter(name), request, |b, request| {
            b.to_async(&runtime)
                .iter(|| async { service.search("Doc", black_box(request)).await.unwrap() });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse_query, bench_index_range, bench_search);
criterion_main!(benches);
