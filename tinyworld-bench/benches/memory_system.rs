//! TinyWorld memory engine benchmarks.
//!
//! Rough targets on a laptop:
//!   memory_store_single ................ < 50μs
//!   recall_recent_8_from_50 ............ < 100μs
//!   recall_similar_top8_from_200 ....... < 500μs
//!   recall_similar_top8_from_1000_ann .. < 1ms
//!   decay_pass_200 ..................... < 2ms

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

use tinyworld_core::config::{MemoryConfig, RetrievalConfig};
use tinyworld_core::embedding::{EmbeddingProvider, HashingEmbeddingProvider};
use tinyworld_core::{CharacterId, Context, InMemoryBackend, MemoryCategory, MemoryStore};

const TOPICS: &[&str] = &[
    "the olive tree by the well",
    "a stranger asking about virtue",
    "the smell of bread from the bakery",
    "why the river never stops",
    "the meaning of courage",
    "a quiet path towards the hills",
    "the old temple steps",
    "whether anyone truly knows anything",
];

fn line(i: usize) -> String {
    format!("Thought {i}: I keep returning to {}.", TOPICS[i % TOPICS.len()])
}

fn store_with(records: usize, long_term: bool) -> MemoryStore {
    let memory = MemoryConfig {
        working_capacity: records.max(1),
        ..MemoryConfig::default()
    };
    let retrieval = RetrievalConfig::default();
    let store = MemoryStore::open(
        CharacterId::new("bench"),
        Arc::new(InMemoryBackend::new()),
        Arc::new(HashingEmbeddingProvider::new(retrieval.embedding_dimensions)),
        memory,
        retrieval,
    )
    .expect("store");
    // Importance 9 consolidates immediately; 4 stays in the working tier.
    let importance = if long_term { 9.0 } else { 4.0 };
    for i in 0..records {
        store
            .store(&line(i), MemoryCategory::Thought, importance, 0.0, Context::new())
            .expect("store");
    }
    store
}

fn bench_store(c: &mut Criterion) {
    c.bench_function("memory_store_single", |b| {
        b.iter_batched(
            || MemoryStore::in_memory(CharacterId::new("bench")).expect("store"),
            |store| {
                let id = store
                    .store(
                        black_box("I wonder what lies beyond the hills."),
                        MemoryCategory::Reflection,
                        5.5,
                        0.1,
                        Context::new(),
                    )
                    .expect("store");
                black_box(id);
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_embedding(c: &mut Criterion) {
    let embedder = HashingEmbeddingProvider::default();
    c.bench_function("hashing_embed_sentence", |b| {
        b.iter(|| black_box(embedder.embed(black_box(&line(3)))));
    });
}

fn bench_recall(c: &mut Criterion) {
    let recent = store_with(50, false);
    c.bench_function("recall_recent_8_from_50", |b| {
        b.iter(|| black_box(recent.recall_recent(black_box(8)).expect("recall")));
    });

    let small = store_with(200, false);
    c.bench_function("recall_similar_top8_from_200", |b| {
        b.iter(|| {
            black_box(small.recall_similar(black_box("what is courage?"), 8, 0.0, true))
        });
    });

    let large = store_with(1_000, true);
    c.bench_function("recall_similar_top8_from_1000_ann", |b| {
        b.iter(|| {
            black_box(large.recall_similar(black_box("the temple by the river"), 8, 0.0, true))
        });
    });
}

fn bench_decay(c: &mut Criterion) {
    c.bench_function("decay_pass_200", |b| {
        b.iter_batched(
            || store_with(200, false),
            |store| {
                let report = store
                    .decay(chrono::Duration::hours(24), 3.0)
                    .expect("decay");
                black_box(report);
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_store, bench_embedding, bench_recall, bench_decay);
criterion_main!(benches);
