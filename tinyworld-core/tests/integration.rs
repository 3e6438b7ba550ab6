//! Integration Tests: End-to-End Memory Flows
//!
//! These tests verify complete memory lifecycle scenarios across the public
//! API: store → recall → consolidate → decay → persist → reopen.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use chrono::{Duration, Utc};

use tinyworld_core::backend::{InMemoryBackend, MemoryBackend, SqliteBackend};
use tinyworld_core::config::{MemoryConfig, PersistenceConfig, RetrievalConfig};
use tinyworld_core::embedding::HashingEmbeddingProvider;
use tinyworld_core::error::{MemoryError, Result};
use tinyworld_core::store::{Context, MemoryStore};
use tinyworld_core::types::{CharacterId, MemoryCategory, MemoryId, MemoryRecord, MemoryTier};

fn socrates() -> CharacterId {
    CharacterId::new("socrates_001")
}

fn open(backend: Arc<dyn MemoryBackend>) -> MemoryStore {
    MemoryStore::open(
        socrates(),
        backend,
        Arc::new(HashingEmbeddingProvider::default()),
        MemoryConfig::default(),
        RetrievalConfig::default(),
    )
    .expect("open store")
}

/// A store whose clock is `base + offset_hours`.
fn with_hours_clock(store: MemoryStore) -> (MemoryStore, Arc<AtomicI64>) {
    let base = Utc::now();
    let hours = Arc::new(AtomicI64::new(0));
    let h = Arc::clone(&hours);
    let store = store.with_clock(Arc::new(move || base + Duration::hours(h.load(Ordering::SeqCst))));
    (store, hours)
}

// ---------------------------------------------------------------------------
// Similarity recall
// ---------------------------------------------------------------------------

#[test]
fn purpose_is_recalled_above_breakfast() {
    let store = open(Arc::new(InMemoryBackend::new()));
    let purpose = store
        .store("I wonder about my purpose", MemoryCategory::Thought, 8.0, 0.1, Context::new())
        .expect("store purpose");
    store
        .store("I had pancakes for breakfast", MemoryCategory::Thought, 2.0, 0.0, Context::new())
        .expect("store pancakes");

    let hits = store.recall_similar("purpose and meaning", 3, 0.0, true);
    assert!(!hits.is_empty());
    assert_eq!(hits[0].record.id, purpose);
    let ids: Vec<MemoryId> = hits.iter().map(|h| h.record.id).collect();
    let unique: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len(), "no record returned twice");
}

#[test]
fn insight_lands_in_long_term_immediately() {
    let store = open(Arc::new(InMemoryBackend::new()));
    let id = store
        .store(
            "Knowing that I know nothing is the start of wisdom",
            MemoryCategory::Insight,
            9.5,
            0.3,
            Context::new(),
        )
        .expect("store");

    let long_term = store.long_term().expect("long-term");
    assert_eq!(long_term.len(), 1);
    assert_eq!(long_term[0].id, id);
    assert!(long_term[0].consolidated_at.is_some());
    assert_eq!(long_term[0].reinforcement_count, 1);
}

#[test]
fn long_term_only_recall_is_opt_in() {
    let memory = MemoryConfig {
        working_capacity: 1,
        ..MemoryConfig::default()
    };
    let store = MemoryStore::open(
        socrates(),
        Arc::new(InMemoryBackend::new()),
        Arc::new(HashingEmbeddingProvider::default()),
        memory,
        RetrievalConfig::default(),
    )
    .expect("open");
    store
        .store("the oracle spoke of wisdom", MemoryCategory::Insight, 9.0, 0.0, Context::new())
        .expect("store");
    store
        .store("sand between my toes", MemoryCategory::Perception, 9.5, 0.0, Context::new())
        .expect("store");

    // The oracle record was evicted from working but survives in long-term.
    assert!(store.recall_similar("oracle wisdom", 5, 0.2, false).is_empty());
    let hits = store.recall_similar("oracle wisdom", 5, 0.2, true);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].tier, MemoryTier::LongTerm);
}

// ---------------------------------------------------------------------------
// Consolidation
// ---------------------------------------------------------------------------

#[test]
fn consolidation_is_idempotent_and_reinforces() {
    let store = open(Arc::new(InMemoryBackend::new()));
    let id = store
        .store("the shape of a cloud", MemoryCategory::Perception, 2.0, 0.0, Context::new())
        .expect("store");
    assert!(store.long_term().expect("long-term").is_empty());

    store.consolidate(id).expect("first");
    let second = store.consolidate(id).expect("second");

    let long_term = store.long_term().expect("long-term");
    assert_eq!(long_term.len(), 1);
    assert_eq!(second.reinforcement_count, 2);
    // The working copy stays in place.
    assert_eq!(store.working().expect("working").len(), 1);
}

#[test]
fn associations_link_related_records() {
    let store = open(Arc::new(InMemoryBackend::new()));
    let first = store
        .store("justice in the city", MemoryCategory::Thought, 3.0, 0.0, Context::new())
        .expect("store");
    let second = store
        .store("justice for the citizens of the city", MemoryCategory::Thought, 3.0, 0.0, Context::new())
        .expect("store");
    store
        .store("a goat ate my sandal", MemoryCategory::Thought, 3.0, 0.0, Context::new())
        .expect("store");

    let copy = store.consolidate(second).expect("consolidate");
    assert_eq!(copy.associations, vec![first]);
}

// ---------------------------------------------------------------------------
// Decay
// ---------------------------------------------------------------------------

#[test]
fn decay_removes_only_old_weak_records() {
    let (store, hours) = with_hours_clock(open(Arc::new(InMemoryBackend::new())));
    let weak_old = store
        .store("a dull afternoon", MemoryCategory::Thought, 1.0, 0.0, Context::new())
        .expect("store");
    let strong_old = store
        .store("the trial of a friend", MemoryCategory::Thought, 6.0, 0.0, Context::new())
        .expect("store");
    hours.store(30, Ordering::SeqCst);
    let weak_young = store
        .store("a fly on the wall", MemoryCategory::Thought, 0.5, 0.0, Context::new())
        .expect("store");

    let report = store.decay(Duration::hours(24), 3.0).expect("decay");
    assert_eq!(report.working_removed, 1);
    assert!(store.get(weak_old).expect("get").is_none());
    assert!(store.get(strong_old).expect("get").is_some());
    assert!(store.get(weak_young).expect("get").is_some());
    assert_eq!(store.counters().decay_passes, 1);
}

#[test]
fn long_term_outlives_working_decay() {
    let (store, hours) = with_hours_clock(open(Arc::new(InMemoryBackend::new())));
    let id = store
        .store("a sudden fear", MemoryCategory::Thought, 1.0, -0.9, Context::new())
        .expect("store");
    hours.store(48, Ordering::SeqCst);
    store.decay(Duration::hours(24), 3.0).expect("decay");

    let (tier, _) = store.get(id).expect("get").expect("still remembered");
    assert_eq!(tier, MemoryTier::LongTerm);

    hours.store(24 * 30, Ordering::SeqCst);
    store.decay(Duration::hours(24), 3.0).expect("decay");
    assert!(store.get(id).expect("get").is_none());
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tinyworld.db");
    let config = PersistenceConfig::default();

    let id = {
        let backend = Arc::new(SqliteBackend::open(&path, &config).expect("open db"));
        let store = open(backend);
        store
            .store("the hemlock tastes bitter", MemoryCategory::Insight, 9.0, -0.6, Context::new())
            .expect("store")
    };

    let backend = Arc::new(SqliteBackend::open(&path, &config).expect("reopen db"));
    let store = open(backend);
    let stats = store.stats().expect("stats");
    assert_eq!(stats.working, 1);
    assert_eq!(stats.long_term, 1);
    let hits = store.recall_similar("bitter hemlock", 1, 0.5, true);
    assert_eq!(hits[0].record.id, id);
}

#[test]
fn characters_do_not_share_namespaces() {
    let backend: Arc<dyn MemoryBackend> = Arc::new(InMemoryBackend::new());
    let a = open(Arc::clone(&backend));
    let b = MemoryStore::open(
        CharacterId::new("plato_001"),
        backend,
        Arc::new(HashingEmbeddingProvider::default()),
        MemoryConfig::default(),
        RetrievalConfig::default(),
    )
    .expect("open");
    a.store("the cave", MemoryCategory::Thought, 3.0, 0.0, Context::new()).expect("store");
    assert_eq!(b.stats().expect("stats").working, 0);
    assert!(b.recall_similar("the cave", 5, 0.0, true).is_empty());
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

/// Fails the next `failures` writes, and every read while `fail_reads` is set.
struct FlakyBackend {
    inner: InMemoryBackend,
    failures: AtomicUsize,
    fail_reads: AtomicBool,
}

impl FlakyBackend {
    fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryBackend::new(),
            failures: AtomicUsize::new(failures),
            fail_reads: AtomicBool::new(false),
        }
    }

    fn trip(&self) -> Result<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(MemoryError::unavailable("put", "disk unplugged"));
        }
        Ok(())
    }

    fn read_guard(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MemoryError::unavailable("list", "disk unplugged"));
        }
        Ok(())
    }
}

impl MemoryBackend for FlakyBackend {
    fn put(&self, tier: MemoryTier, record: &MemoryRecord) -> Result<()> {
        self.trip()?;
        self.inner.put(tier, record)
    }

    fn get(&self, c: &CharacterId, tier: MemoryTier, id: MemoryId) -> Result<Option<MemoryRecord>> {
        self.read_guard()?;
        self.inner.get(c, tier, id)
    }

    fn remove(&self, c: &CharacterId, tier: MemoryTier, id: MemoryId) -> Result<bool> {
        self.inner.remove(c, tier, id)
    }

    fn list(&self, c: &CharacterId, tier: MemoryTier) -> Result<Vec<MemoryRecord>> {
        self.read_guard()?;
        self.inner.list(c, tier)
    }

    fn count(&self, c: &CharacterId, tier: MemoryTier) -> Result<usize> {
        self.read_guard()?;
        self.inner.count(c, tier)
    }

    fn clear(&self, c: &CharacterId) -> Result<usize> {
        self.inner.clear(c)
    }
}

#[test]
fn single_write_failure_is_retried() {
    let store = open(Arc::new(FlakyBackend::new(1)));
    store
        .store("persistence hiccup", MemoryCategory::Thought, 3.0, 0.0, Context::new())
        .expect("second attempt succeeds");
    assert_eq!(store.stats().expect("stats").working, 1);
}

#[test]
fn repeated_write_failure_drops_record() {
    let store = open(Arc::new(FlakyBackend::new(2)));
    let err = store
        .store("lost thought", MemoryCategory::Thought, 3.0, 0.0, Context::new())
        .unwrap_err();
    assert!(matches!(err, MemoryError::PersistenceUnavailable { .. }));
    assert_eq!(store.stats().expect("stats").working, 0);
    assert_eq!(store.counters().store_failures, 1);
}

#[test]
fn failed_similarity_search_returns_empty() {
    let backend = Arc::new(FlakyBackend::new(0));
    let store = open(Arc::clone(&backend) as Arc<dyn MemoryBackend>);
    store
        .store("a thought about the stars", MemoryCategory::Thought, 3.0, 0.0, Context::new())
        .expect("store");

    backend.fail_reads.store(true, Ordering::SeqCst);
    assert!(store.recall_similar("stars", 3, 0.0, true).is_empty());
    assert_eq!(store.counters().recall_failures, 1);

    backend.fail_reads.store(false, Ordering::SeqCst);
    assert_eq!(store.recall_similar("stars", 3, 0.0, true).len(), 1);
}
