use claude_memory_core::search::bm25::{Bm25Params, InvertedIndex};
use claude_memory_core::search::hybrid::{content_preview, reciprocal_rank_fusion, weighted_fusion};
use claude_memory_core::search::vector::{sparse_cosine, top_terms, TfIdfVectorizer};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const CORPUS: &[&str] = &[
    "rust ownership and borrowing rules prevent data races at compile time",
    "the graph engine clusters memories by cosine similarity over tf-idf vectors",
    "tiered compression moves old memories from full content to bullet summaries",
    "sqlite write-ahead logging keeps the store responsive under concurrent reads",
    "pattern learner tracks identity facts with bayesian confidence updates",
    "hybrid search fuses bm25 lexical scores with vector semantic scores",
    "reciprocal rank fusion combines ranked lists without needing score calibration",
    "profiles partition memories so agents never leak context across projects",
    "the orchestrator gates every write behind a trust score and rate limiter",
    "cold storage archives ancient memories into gzip-compressed json batches",
];

fn build_index() -> InvertedIndex {
    let mut index = InvertedIndex::new();
    for (id, text) in CORPUS.iter().enumerate() {
        index.index_document(id as i64, text);
    }
    index
}

fn bench_bm25_search(c: &mut Criterion) {
    let index = build_index();
    let params = Bm25Params::default();
    c.bench_function("bm25_search", |b| {
        b.iter(|| index.search(black_box("memory graph compression"), 5, params))
    });
}

fn bench_rrf_fusion(c: &mut Criterion) {
    let lexical: Vec<(i64, f64)> = (0..10).map(|i| (i, 1.0 / (i + 1) as f64)).collect();
    let semantic: Vec<(i64, f64)> = (0..10).rev().map(|i| (i, 1.0 / (i + 1) as f64)).collect();
    c.bench_function("reciprocal_rank_fusion", |b| {
        b.iter(|| reciprocal_rank_fusion(black_box(&[&lexical, &semantic]), 60.0))
    });
}

fn bench_weighted_fusion(c: &mut Criterion) {
    let lexical: Vec<(i64, f64)> = (0..10).map(|i| (i, 1.0 / (i + 1) as f64)).collect();
    let semantic: Vec<(i64, f64)> = (0..10).rev().map(|i| (i, 1.0 / (i + 1) as f64)).collect();
    c.bench_function("weighted_fusion", |b| {
        b.iter(|| weighted_fusion(black_box(&[(lexical.as_slice(), 0.6), (semantic.as_slice(), 0.4)])))
    });
}

fn bench_tfidf_vectorize(c: &mut Criterion) {
    let mut vectorizer = TfIdfVectorizer::new();
    vectorizer.rebuild(CORPUS.iter().copied());
    c.bench_function("tfidf_vectorize", |b| {
        b.iter(|| vectorizer.vectorize(black_box("hybrid search fuses lexical and semantic scores")))
    });
}

fn bench_tfidf_sparse_vectorize(c: &mut Criterion) {
    let mut vectorizer = TfIdfVectorizer::new();
    vectorizer.rebuild(CORPUS.iter().copied());
    c.bench_function("tfidf_sparse_vectorize", |b| {
        b.iter(|| vectorizer.sparse_vectorize(black_box("hybrid search fuses lexical and semantic scores")))
    });
}

fn bench_sparse_cosine(c: &mut Criterion) {
    let mut vectorizer = TfIdfVectorizer::new();
    vectorizer.rebuild(CORPUS.iter().copied());
    let a = vectorizer.sparse_vectorize(CORPUS[0]);
    let b_vec = vectorizer.sparse_vectorize(CORPUS[5]);
    c.bench_function("sparse_cosine", |b| b.iter(|| sparse_cosine(black_box(&a), black_box(&b_vec))));
}

fn bench_top_terms(c: &mut Criterion) {
    let mut vectorizer = TfIdfVectorizer::new();
    vectorizer.rebuild(CORPUS.iter().copied());
    let weights = vectorizer.sparse_vectorize(CORPUS[1]);
    c.bench_function("top_terms", |b| b.iter(|| top_terms(black_box(&weights), 5, 0.01)));
}

fn bench_content_preview(c: &mut Criterion) {
    let long = CORPUS.join(" ");
    c.bench_function("content_preview", |b| {
        b.iter(|| content_preview(black_box(&long), 80))
    });
}

criterion_group!(
    benches,
    bench_bm25_search,
    bench_rrf_fusion,
    bench_weighted_fusion,
    bench_tfidf_vectorize,
    bench_tfidf_sparse_vectorize,
    bench_sparse_cosine,
    bench_top_terms,
    bench_content_preview,
);
criterion_main!(benches);
