//! Recall benchmarks.
//!
//! Run with: cargo bench -p antara-core

use antara_core::recall::hybrid::{is_gated_open, linear_combination, reciprocal_rank_fusion};
use antara_core::recall::lexical::BM25Index;
use antara_core::recall::recency::apply_recency_boost;
use antara_core::util::jaccard;
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_bm25_search(c: &mut Criterion) {
    let documents: Vec<(String, String)> = (0..200)
        .map(|i| (format!("doc-{i}"), format!("session turn {i} about the login flow and token refresh")))
        .collect();
    let index = BM25Index::build(1.2, 0.75, &documents);

    c.bench_function("bm25_search_200docs", |b| {
        b.iter(|| {
            black_box(index.search("login token refresh", 10));
        })
    });
}

fn bench_gated_recall_check(c: &mut Criterion) {
    let cached = ["the login endpoint was returning 500s for expired tokens"];
    c.bench_function("is_gated_open", |b| {
        b.iter(|| {
            black_box(is_gated_open("why did the login endpoint start returning 500s?", &cached));
        })
    });
}

fn bench_recency_boost(c: &mut Criterion) {
    let now = Utc::now();
    let updated_at = now - chrono::Duration::hours(36);
    c.bench_function("apply_recency_boost", |b| {
        b.iter(|| {
            black_box(apply_recency_boost(0.82, updated_at, now));
        })
    });
}

fn bench_rrf_fusion(c: &mut Criterion) {
    let keyword_results: Vec<(String, f32)> =
        (0..50).map(|i| (format!("doc-{i}"), 1.0 - i as f32 / 50.0)).collect();
    let semantic_results: Vec<(String, f32)> =
        (0..50).map(|i| (format!("doc-{}", 25 + i), 1.0 - i as f32 / 50.0)).collect();

    c.bench_function("rrf_50x50", |b| {
        b.iter(|| {
            black_box(reciprocal_rank_fusion(&keyword_results, &semantic_results, 60.0));
        })
    });
}

fn bench_linear_combination(c: &mut Criterion) {
    let keyword_results: Vec<(String, f32)> =
        (0..50).map(|i| (format!("doc-{i}"), 1.0 - i as f32 / 50.0)).collect();
    let semantic_results: Vec<(String, f32)> =
        (0..50).map(|i| (format!("doc-{}", 25 + i), 1.0 - i as f32 / 50.0)).collect();

    c.bench_function("linear_combo_50x50", |b| {
        b.iter(|| {
            black_box(linear_combination(&keyword_results, &semantic_results, 0.3, 0.7));
        })
    });
}

fn bench_jaccard(c: &mut Criterion) {
    let a: Vec<&str> = "the login endpoint throws a 500 on expired tokens".split_whitespace().collect();
    let b: Vec<&str> = "expired tokens make the login endpoint throw a 500".split_whitespace().collect();

    c.bench_function("jaccard_similarity", |bench| {
        bench.iter(|| {
            black_box(jaccard(a.iter().copied(), b.iter().copied()));
        })
    });
}

criterion_group!(
    benches,
    bench_bm25_search,
    bench_gated_recall_check,
    bench_recency_boost,
    bench_rrf_fusion,
    bench_linear_combination,
    bench_jaccard,
);
criterion_main!(benches);
