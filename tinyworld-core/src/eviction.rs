//! Working-tier capacity eviction.
//!
//! When the working tier exceeds its capacity, records are removed in
//! ascending [`priority`] order until it fits again. Records that qualify
//! for consolidation are promoted to the long-term tier before they are
//! evicted, so nothing worth keeping is lost to churn.

use chrono::{DateTime, Utc};

use crate::types::{MemoryId, MemoryRecord, Score};

/// `1 / (1 + age_hours)`: 1.0 for a brand-new record, approaching 0 with age.
#[must_use]
pub fn recency_score(record: &MemoryRecord, now: DateTime<Utc>) -> f64 {
    1.0 / (1.0 + record.age_hours(now))
}

/// Retention priority: `0.5·importance + 0.3·recency + 0.2·access_count`.
///
/// Lower priority is evicted first.
#[must_use]
pub fn priority(record: &MemoryRecord, now: DateTime<Utc>) -> f64 {
    0.5 * f64::from(record.importance)
        + 0.3 * recency_score(record, now)
        + 0.2 * f64::from(record.access_count)
}

/// IDs to evict so that at most `capacity` records remain, lowest priority
/// first. Ties go to the older record.
#[must_use]
pub fn select_evictions(
    records: &[MemoryRecord],
    capacity: usize,
    now: DateTime<Utc>,
) -> Vec<MemoryId> {
    let excess = records.len().saturating_sub(capacity);
    if excess == 0 {
        return Vec::new();
    }
    let mut ranked: Vec<(Score, DateTime<Utc>, MemoryId)> = records
        .iter()
        .map(|r| (Score::new(priority(r, now)), r.created_at, r.id))
        .collect();
    ranked.sort();
    ranked.into_iter().take(excess).map(|(_, _, id)| id).collect()
}
