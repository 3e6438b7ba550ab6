//! The two-tier memory store of one character.
//!
//! [`MemoryStore`] owns a character's namespace in a [`MemoryBackend`] and
//! implements store / recall / consolidate / decay on top of it. Writes are
//! serialized through one mutex per store; reads go straight to the backend.
//!
//! ## Usage
//!
//! ```rust
//! # use tinyworld_core::store::MemoryStore;
//! # use tinyworld_core::types::{CharacterId, MemoryCategory};
//! let store = MemoryStore::in_memory(CharacterId::new("socrates_001"))?;
//! store.store("I wonder about my purpose", MemoryCategory::Thought, 8.0, 0.2, Default::default())?;
//! let hits = store.recall_similar("purpose and meaning", 3, 0.0, true);
//! assert_eq!(hits.len(), 1);
//! # Ok::<(), tinyworld_core::MemoryError>(())
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{InMemoryBackend, MemoryBackend};
use crate::config::{MemoryConfig, RetrievalConfig};
use crate::consolidation;
use crate::decay::{self, DecayReport};
use crate::embedding::{EmbeddingProvider, HashingEmbeddingProvider};
use crate::error::{MemoryError, Result};
use crate::eviction;
use crate::index::LongTermIndex;
use crate::metrics::{CounterSnapshot, MemoryCounters};
use crate::types::{
    CharacterId, Clock, MemoryCategory, MemoryId, MemoryRecord, MemoryStats, MemoryTier,
    RecallHit, clamp_importance, clamp_valence, system_clock,
};

/// Free-form context attached to a stored record.
pub type Context = BTreeMap<String, serde_json::Value>;

/// One character's working and long-term memory.
pub struct MemoryStore {
    character: CharacterId,
    backend: Arc<dyn MemoryBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    memory: MemoryConfig,
    retrieval: RetrievalConfig,
    clock: Clock,
    write_lock: Mutex<()>,
    index: Mutex<LongTermIndex>,
    counters: MemoryCounters,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("character", &self.character)
            .field("embedder", &self.embedder.model_name())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open the store for `character`, indexing any long-term records the
    /// backend already holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the long-term tier cannot be listed.
    pub fn open(
        character: CharacterId,
        backend: Arc<dyn MemoryBackend>,
        embedder: Arc<dyn EmbeddingProvider>,
        memory: MemoryConfig,
        retrieval: RetrievalConfig,
    ) -> Result<Self> {
        let mut index = LongTermIndex::new();
        let long_term = backend.list(&character, MemoryTier::LongTerm)?;
        for record in &long_term {
            if let Some(embedding) = &record.embedding {
                index.upsert(record.id, embedding);
            }
        }
        info!(
            character = %character,
            long_term = long_term.len(),
            embedder = embedder.model_name(),
            "memory store opened"
        );
        Ok(Self {
            character,
            backend,
            embedder,
            memory,
            retrieval,
            clock: system_clock(),
            write_lock: Mutex::new(()),
            index: Mutex::new(index),
            counters: MemoryCounters::new(),
        })
    }

    /// A store on a fresh [`InMemoryBackend`] with default configuration.
    ///
    /// # Errors
    ///
    /// Never fails in practice; mirrors [`MemoryStore::open`].
    pub fn in_memory(character: CharacterId) -> Result<Self> {
        let retrieval = RetrievalConfig::default();
        Self::open(
            character,
            Arc::new(InMemoryBackend::new()),
            Arc::new(HashingEmbeddingProvider::new(retrieval.embedding_dimensions)),
            MemoryConfig::default(),
            retrieval,
        )
    }

    /// Replace the wall clock (tests use this to age records).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The owning character.
    #[must_use]
    pub fn character(&self) -> &CharacterId {
        &self.character
    }

    /// Memory configuration in effect.
    #[must_use]
    pub fn memory_config(&self) -> &MemoryConfig {
        &self.memory
    }

    /// Current time according to the store's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------

    /// Retention priority of `record` (lower is evicted first).
    #[must_use]
    pub fn priority(&self, record: &MemoryRecord) -> f64 {
        eviction::priority(record, self.now())
    }

    /// Whether `record` qualifies for the long-term tier.
    #[must_use]
    pub fn should_consolidate(&self, record: &MemoryRecord) -> bool {
        consolidation::should_consolidate(record, &self.memory)
    }

    /// Importance of `record` discounted by age and boosted by access.
    #[must_use]
    pub fn effective_importance(&self, record: &MemoryRecord) -> f32 {
        decay::effective_importance(record, self.now())
    }

    // ------------------------------------------------------------------
    // Store
    // ------------------------------------------------------------------

    /// Insert a new record into the working tier.
    ///
    /// Importance and valence are clamped into range. The write is retried
    /// once; a record that qualifies is consolidated immediately, and the
    /// working tier is trimmed back to capacity.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::PersistenceUnavailable`] if both write
    /// attempts fail. The record is dropped in that case.
    pub fn store(
        &self,
        content: &str,
        category: MemoryCategory,
        importance: f32,
        emotional_valence: f32,
        context: Context,
    ) -> Result<MemoryId> {
        let clamped_importance = clamp_importance(importance);
        let clamped_valence = clamp_valence(emotional_valence);
        if clamped_importance.to_bits() != importance.to_bits()
            || clamped_valence.to_bits() != emotional_valence.to_bits()
        {
            debug!(
                character = %self.character,
                importance,
                emotional_valence,
                clamped_importance,
                clamped_valence,
                "clamped out-of-range scores"
            );
        }

        let mut record = MemoryRecord::new(
            self.character.clone(),
            content,
            category,
            clamped_importance,
            clamped_valence,
            self.now(),
        )
        .with_context(context);
        record.embedding = match self.embedder.embed(content) {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(character = %self.character, error = %e, "embedding failed, storing without vector");
                None
            }
        };

        let _guard = self.write_lock.lock();
        self.put_with_retry(MemoryTier::Working, &record)?;
        MemoryCounters::incr(&self.counters.stored);
        debug!(
            character = %self.character,
            id = %record.id,
            category = %record.category,
            importance = record.importance,
            "stored memory"
        );

        if self.should_consolidate(&record) {
            if let Err(e) = self.consolidate_locked(&record) {
                warn!(character = %self.character, id = %record.id, error = %e, "consolidation failed");
            }
        }
        if let Err(e) = self.enforce_capacity_locked() {
            warn!(character = %self.character, error = %e, "capacity check failed");
        }
        Ok(record.id)
    }

    fn put_with_retry(&self, tier: MemoryTier, record: &MemoryRecord) -> Result<()> {
        match self.backend.put(tier, record) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(character = %self.character, tier = %tier, error = %first, "write failed, retrying once");
                self.backend.put(tier, record).map_err(|second| {
                    MemoryCounters::incr(&self.counters.store_failures);
                    warn!(character = %self.character, tier = %tier, error = %second, "write failed twice, dropping record");
                    MemoryError::unavailable("put", second)
                })
            }
        }
    }

    fn enforce_capacity_locked(&self) -> Result<usize> {
        let capacity = self.memory.working_capacity;
        if self.backend.count(&self.character, MemoryTier::Working)? <= capacity {
            return Ok(0);
        }
        let records = self.backend.list(&self.character, MemoryTier::Working)?;
        let victims = eviction::select_evictions(&records, capacity, self.now());
        let by_id: HashMap<MemoryId, &MemoryRecord> = records.iter().map(|r| (r.id, r)).collect();

        let mut evicted = 0;
        for id in victims {
            let Some(record) = by_id.get(&id) else { continue };
            if self.should_consolidate(record) {
                let promoted = self
                    .backend
                    .get(&self.character, MemoryTier::LongTerm, id)?
                    .is_some();
                if !promoted {
                    if let Err(e) = self.consolidate_locked(record) {
                        warn!(character = %self.character, id = %id, error = %e, "keeping record, consolidation before eviction failed");
                        continue;
                    }
                }
            }
            if self.backend.remove(&self.character, MemoryTier::Working, id)? {
                evicted += 1;
            }
        }
        MemoryCounters::add(&self.counters.evicted, evicted as u64);
        if evicted > 0 {
            debug!(character = %self.character, evicted, capacity, "evicted working memories");
        }
        Ok(evicted)
    }

    // ------------------------------------------------------------------
    // Recall
    // ------------------------------------------------------------------

    /// The `limit` most recent working-tier records, newest first.
    ///
    /// Access statistics of the returned records are updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the working tier cannot be read.
    pub fn recall_recent(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        MemoryCounters::incr(&self.counters.recalls);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut records = self.backend.list(&self.character, MemoryTier::Working)?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        let mut touched: Vec<(MemoryTier, MemoryRecord)> =
            records.into_iter().map(|r| (MemoryTier::Working, r)).collect();
        self.touch(&mut touched);
        Ok(touched.into_iter().map(|(_, r)| r).collect())
    }

    /// Records most similar to `query`, best first.
    ///
    /// At most `limit` results, each with similarity ≥ `min_similarity`,
    /// drawn from the working tier and, if `include_long_term`, the
    /// long-term tier. A record present in both tiers is returned once.
    /// Any failure yields an empty result instead of an error.
    pub fn recall_similar(
        &self,
        query: &str,
        limit: usize,
        min_similarity: f32,
        include_long_term: bool,
    ) -> Vec<RecallHit> {
        MemoryCounters::incr(&self.counters.recalls);
        match self.try_recall_similar(query, limit, min_similarity, include_long_term) {
            Ok(hits) => hits,
            Err(e) => {
                MemoryCounters::incr(&self.counters.recall_failures);
                warn!(character = %self.character, error = %e, "similarity search failed");
                Vec::new()
            }
        }
    }

    fn try_recall_similar(
        &self,
        query: &str,
        limit: usize,
        min_similarity: f32,
        include_long_term: bool,
    ) -> Result<Vec<RecallHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(query)?;

        let mut hits: Vec<RecallHit> = self
            .backend
            .list(&self.character, MemoryTier::Working)?
            .into_iter()
            .filter_map(|record| {
                let similarity = record.embedding.as_ref()?.cosine_similarity(&query);
                Some(RecallHit {
                    record,
                    similarity,
                    tier: MemoryTier::Working,
                })
            })
            .collect();

        if include_long_term {
            let candidates = {
                let mut index = self.index.lock();
                index.ensure_built(self.retrieval.ann_threshold);
                index.search(&query, limit.saturating_add(hits.len()))
            };
            for candidate in candidates {
                if let Some(record) =
                    self.backend
                        .get(&self.character, MemoryTier::LongTerm, candidate.memory_id)?
                {
                    hits.push(RecallHit {
                        record,
                        similarity: candidate.similarity,
                        tier: MemoryTier::LongTerm,
                    });
                }
            }
        }

        hits.retain(|h| h.similarity >= min_similarity);
        // Working first on ties so the live copy wins the de-duplication.
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| (a.tier == MemoryTier::LongTerm).cmp(&(b.tier == MemoryTier::LongTerm)))
        });
        let mut seen = std::collections::HashSet::new();
        hits.retain(|h| seen.insert(h.record.id));
        hits.truncate(limit);

        let mut touched: Vec<(MemoryTier, MemoryRecord)> =
            hits.iter().map(|h| (h.tier, h.record.clone())).collect();
        self.touch(&mut touched);
        for (hit, (_, record)) in hits.iter_mut().zip(touched) {
            hit.record = record;
        }
        Ok(hits)
    }

    /// Bump access statistics and write them back. Write failures are
    /// logged; the caller still gets the records.
    ///
    /// Each record is re-read under the write lock; one removed since it
    /// was listed is not written back.
    fn touch(&self, records: &mut [(MemoryTier, MemoryRecord)]) {
        let now = self.now();
        let _guard = self.write_lock.lock();
        for (tier, record) in records.iter_mut() {
            match self.backend.get(&self.character, *tier, record.id) {
                Ok(Some(current)) => *record = current,
                Ok(None) => {
                    debug!(character = %self.character, id = %record.id, "record removed before access update");
                    continue;
                }
                Err(e) => {
                    warn!(character = %self.character, id = %record.id, error = %e, "failed to re-read record");
                    continue;
                }
            }
            record.record_access(now);
            if let Err(e) = self.backend.put(*tier, record) {
                warn!(character = %self.character, id = %record.id, error = %e, "failed to persist access stats");
                continue;
            }
            let crossed = record.access_count == self.memory.consolidation_access_count;
            if *tier == MemoryTier::Working && crossed {
                if let Err(e) = self.consolidate_locked(record) {
                    warn!(character = %self.character, id = %record.id, error = %e, "consolidation failed");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Consolidation
    // ------------------------------------------------------------------

    /// Copy a working-tier record into the long-term tier.
    ///
    /// Idempotent with respect to entries: the long-term copy shares the
    /// record's id, so repeated calls reinforce one entry.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::MemoryNotFound`] if the record is not in the
    /// working tier, or a backend error. On error the working record is
    /// left unchanged.
    pub fn consolidate(&self, id: MemoryId) -> Result<MemoryRecord> {
        let _guard = self.write_lock.lock();
        let record = self
            .backend
            .get(&self.character, MemoryTier::Working, id)?
            .ok_or(MemoryError::MemoryNotFound {
                id,
                tier: MemoryTier::Working,
            })?;
        self.consolidate_locked(&record)
    }

    fn consolidate_locked(&self, record: &MemoryRecord) -> Result<MemoryRecord> {
        let result = self.promote_locked(record);
        match &result {
            Ok(copy) => {
                MemoryCounters::incr(&self.counters.consolidated);
                debug!(
                    character = %self.character,
                    id = %copy.id,
                    reinforcement = copy.reinforcement_count,
                    associations = copy.associations.len(),
                    "consolidated memory"
                );
            }
            Err(_) => MemoryCounters::incr(&self.counters.consolidation_failures),
        }
        result
    }

    fn promote_locked(&self, record: &MemoryRecord) -> Result<MemoryRecord> {
        let existing = self
            .backend
            .get(&self.character, MemoryTier::LongTerm, record.id)?;

        let mut candidates = self.backend.list(&self.character, MemoryTier::Working)?;
        if let Some(embedding) = &record.embedding {
            let nearest = {
                let mut index = self.index.lock();
                index.ensure_built(self.retrieval.ann_threshold);
                index.search(embedding, self.memory.max_associations + 1)
            };
            for hit in nearest {
                if let Some(r) =
                    self.backend
                        .get(&self.character, MemoryTier::LongTerm, hit.memory_id)?
                {
                    candidates.push(r);
                }
            }
        }
        let associations = consolidation::associations(record, &candidates, &self.memory);

        let copy = consolidation::promote(record, existing.as_ref(), associations, self.now());
        self.backend.put(MemoryTier::LongTerm, &copy)?;
        if let Some(embedding) = &copy.embedding {
            self.index.lock().upsert(copy.id, embedding);
        }
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Decay
    // ------------------------------------------------------------------

    /// Forget old, weak records.
    ///
    /// Working-tier records older than `max_age` whose effective importance
    /// is below `importance_floor` are removed. Long-term records use a
    /// slower rate and a longer horizon (see [`decay::should_forget_long_term`]).
    ///
    /// # Errors
    ///
    /// Returns an error if a tier cannot be read or a removal fails.
    pub fn decay(&self, max_age: Duration, importance_floor: f32) -> Result<DecayReport> {
        #[allow(clippy::cast_precision_loss)]
        let max_age_hours = max_age.num_milliseconds() as f64 / 3_600_000.0;
        let now = self.now();
        let mut report = DecayReport::default();

        let _guard = self.write_lock.lock();
        let working = self.backend.list(&self.character, MemoryTier::Working)?;
        report.working_examined = working.len();
        for record in &working {
            if decay::should_forget(record, now, max_age_hours, importance_floor)
                && self
                    .backend
                    .remove(&self.character, MemoryTier::Working, record.id)?
            {
                report.working_removed += 1;
            }
        }

        let long_term = self.backend.list(&self.character, MemoryTier::LongTerm)?;
        report.long_term_examined = long_term.len();
        for record in &long_term {
            if decay::should_forget_long_term(record, now, max_age_hours, importance_floor, &self.memory)
                && self
                    .backend
                    .remove(&self.character, MemoryTier::LongTerm, record.id)?
            {
                self.index.lock().remove(record.id);
                report.long_term_removed += 1;
            }
        }

        MemoryCounters::incr(&self.counters.decay_passes);
        MemoryCounters::add(&self.counters.decayed, report.removed() as u64);
        info!(
            character = %self.character,
            working_removed = report.working_removed,
            long_term_removed = report.long_term_removed,
            "decay pass complete"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Maintenance and views
    // ------------------------------------------------------------------

    /// Remove a record from both tiers. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub fn forget(&self, id: MemoryId) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let working = self.backend.remove(&self.character, MemoryTier::Working, id)?;
        let long_term = self.backend.remove(&self.character, MemoryTier::LongTerm, id)?;
        if long_term {
            self.index.lock().remove(id);
        }
        Ok(working || long_term)
    }

    /// Wipe this character's memories in both tiers.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub fn clear(&self) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let removed = self.backend.clear(&self.character)?;
        self.index.lock().clear();
        info!(character = %self.character, removed, "memory cleared");
        Ok(removed)
    }

    /// Tier sizes and the newest working record time.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub fn stats(&self) -> Result<MemoryStats> {
        let working = self.backend.list(&self.character, MemoryTier::Working)?;
        Ok(MemoryStats {
            working: working.len(),
            long_term: self.backend.count(&self.character, MemoryTier::LongTerm)?,
            last_memory_time: working.iter().map(|r| r.created_at).max(),
        })
    }

    /// Look a record up by id, working tier first.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub fn get(&self, id: MemoryId) -> Result<Option<(MemoryTier, MemoryRecord)>> {
        for tier in MemoryTier::ALL {
            if let Some(record) = self.backend.get(&self.character, tier, id)? {
                return Ok(Some((tier, record)));
            }
        }
        Ok(None)
    }

    /// All working-tier records, newest first.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub fn working(&self) -> Result<Vec<MemoryRecord>> {
        self.tier_newest_first(MemoryTier::Working)
    }

    /// All long-term records, newest first.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub fn long_term(&self) -> Result<Vec<MemoryRecord>> {
        self.tier_newest_first(MemoryTier::LongTerm)
    }

    fn tier_newest_first(&self, tier: MemoryTier) -> Result<Vec<MemoryRecord>> {
        let mut records = self.backend.list(&self.character, tier)?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Counter snapshot for export.
    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }
}
