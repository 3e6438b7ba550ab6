//! Consolidation: promotion of a working record into the long-term tier.
//!
//! The long-term copy keeps the working record's id, so consolidating the
//! same record twice updates one long-term entry instead of adding a second.
//! Each promotion stamps `consolidated_at`, bumps `reinforcement_count`, and
//! recomputes the record's nearest-neighbour associations.

use chrono::{DateTime, Utc};

use crate::config::MemoryConfig;
use crate::types::{MemoryCategory, MemoryId, MemoryRecord, Score};

/// Whether a record qualifies for the long-term tier.
///
/// True when any of: importance ≥ threshold, category is insight,
/// |valence| ≥ threshold, or access count ≥ threshold.
#[must_use]
pub fn should_consolidate(record: &MemoryRecord, config: &MemoryConfig) -> bool {
    record.importance >= config.consolidation_importance
        || record.category == MemoryCategory::Insight
        || record.emotional_valence.abs() >= config.consolidation_valence
        || record.access_count >= config.consolidation_access_count
}

/// Up to `config.max_associations` nearest neighbours of `record` among
/// `candidates`, excluding the record itself and anything below
/// `config.association_min_similarity`. Duplicate ids (a record present in
/// both tiers) count once.
#[must_use]
pub fn associations(
    record: &MemoryRecord,
    candidates: &[MemoryRecord],
    config: &MemoryConfig,
) -> Vec<MemoryId> {
    let Some(embedding) = record.embedding.as_ref() else {
        return Vec::new();
    };
    let mut scored: Vec<(std::cmp::Reverse<Score>, MemoryId)> = candidates
        .iter()
        .filter(|c| c.id != record.id)
        .filter_map(|c| {
            let sim = c.embedding.as_ref()?.cosine_similarity(embedding);
            (sim >= config.association_min_similarity)
                .then(|| (std::cmp::Reverse(Score::new(f64::from(sim))), c.id))
        })
        .collect();
    scored.sort();
    let mut out = Vec::with_capacity(config.max_associations);
    for (_, id) in scored {
        if out.len() == config.max_associations {
            break;
        }
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Build the long-term copy of `source`.
///
/// `existing` is the current long-term entry with the same id, if any; its
/// reinforcement count and access history are carried forward.
#[must_use]
pub fn promote(
    source: &MemoryRecord,
    existing: Option<&MemoryRecord>,
    associations: Vec<MemoryId>,
    now: DateTime<Utc>,
) -> MemoryRecord {
    let mut copy = source.clone();
    copy.associations = associations;
    copy.consolidated_at = Some(now);
    copy.reinforcement_count = existing.map_or(0, |e| e.reinforcement_count) + 1;
    if let Some(prev) = existing {
        copy.access_count = copy.access_count.max(prev.access_count);
        copy.last_accessed = copy.last_accessed.max(prev.last_accessed);
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CharacterId, Embedding};

    fn rec(category: MemoryCategory, importance: f32, valence: f32) -> MemoryRecord {
        MemoryRecord::new(CharacterId::new("c"), "x", category, importance, valence, Utc::now())
    }

    #[test]
    fn thresholds() {
        let cfg = MemoryConfig::default();
        assert!(should_consolidate(&rec(MemoryCategory::Thought, 7.0, 0.0), &cfg));
        assert!(should_consolidate(&rec(MemoryCategory::Insight, 1.0, 0.0), &cfg));
        assert!(should_consolidate(&rec(MemoryCategory::Thought, 1.0, -0.7), &cfg));
        let mut accessed = rec(MemoryCategory::Thought, 1.0, 0.0);
        accessed.access_count = 5;
        assert!(should_consolidate(&accessed, &cfg));
        assert!(!should_consolidate(&rec(MemoryCategory::Reflection, 6.9, 0.69), &cfg));
    }

    #[test]
    fn associations_exclude_self_and_weak_matches() {
        let cfg = MemoryConfig::default();
        let mut target = rec(MemoryCategory::Thought, 5.0, 0.0);
        target.embedding = Some(Embedding(vec![1.0, 0.0]));
        let mut close = rec(MemoryCategory::Thought, 5.0, 0.0);
        close.embedding = Some(Embedding(vec![0.9, 0.1]));
        let mut far = rec(MemoryCategory::Thought, 5.0, 0.0);
        far.embedding = Some(Embedding(vec![0.0, 1.0]));

        let ids = associations(&target, &[target.clone(), close.clone(), far, close.clone()], &cfg);
        assert_eq!(ids, vec![close.id]);
    }

    #[test]
    fn repeated_promotion_reinforces() {
        let now = Utc::now();
        let source = rec(MemoryCategory::Insight, 9.5, 0.0);
        let first = promote(&source, None, Vec::new(), now);
        assert_eq!(first.id, source.id);
        assert_eq!(first.reinforcement_count, 1);
        let second = promote(&source, Some(&first), Vec::new(), now);
        assert_eq!(second.reinforcement_count, 2);
        assert_eq!(second.consolidated_at, Some(now));
    }
}
