//! Forgetting model.
//!
//! Retention follows an exponential curve in wall-clock days, boosted by
//! how often a record was recalled:
//!
//! ```text
//! effective = importance × e^(-decay_rate × age_days) × (1 + 0.1 × access_count)
//! ```
//!
//! clamped to `[0, 10]`. The working tier drops old, weak records; the
//! long-term tier applies the same rule with a much slower rate and a much
//! longer age horizon.

use chrono::{DateTime, Utc};

use crate::config::MemoryConfig;
use crate::types::{MemoryRecord, clamp_importance};

/// Per-record decay rate: less important and less emotional records fade
/// faster.
#[must_use]
pub fn decay_rate(importance: f32, emotional_valence: f32) -> f32 {
    0.1 * (1.0 - importance / 20.0) * (1.0 - emotional_valence.abs() * 0.3)
}

/// Importance discounted by age and boosted by access frequency, using the
/// record's own decay rate scaled by `rate_factor`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn effective_importance_scaled(
    record: &MemoryRecord,
    now: DateTime<Utc>,
    rate_factor: f32,
) -> f32 {
    let age_days = record.age_hours(now) / 24.0;
    let rate = f64::from(record.decay_rate * rate_factor);
    let retention = (-rate * age_days).exp() as f32;
    let boost = 1.0 + 0.1 * record.access_count as f32;
    clamp_importance(record.importance * retention * boost)
}

/// Importance discounted by age and boosted by access frequency.
#[must_use]
pub fn effective_importance(record: &MemoryRecord, now: DateTime<Utc>) -> f32 {
    effective_importance_scaled(record, now, 1.0)
}

/// Whether a working-tier record should be forgotten: strictly older than
/// `max_age_hours` and weaker than `floor`.
#[must_use]
pub fn should_forget(
    record: &MemoryRecord,
    now: DateTime<Utc>,
    max_age_hours: f64,
    floor: f32,
) -> bool {
    record.age_hours(now) > max_age_hours && effective_importance(record, now) < floor
}

/// Whether a long-term record should be forgotten under the slower policy.
#[must_use]
pub fn should_forget_long_term(
    record: &MemoryRecord,
    now: DateTime<Utc>,
    max_age_hours: f64,
    floor: f32,
    config: &MemoryConfig,
) -> bool {
    let horizon = max_age_hours * config.long_term_age_multiplier;
    record.age_hours(now) > horizon
        && effective_importance_scaled(record, now, config.long_term_decay_factor) < floor / 2.0
}

/// Outcome of one decay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecayReport {
    /// Working-tier records examined.
    pub working_examined: usize,
    /// Working-tier records removed.
    pub working_removed: usize,
    /// Long-term records examined.
    pub long_term_examined: usize,
    /// Long-term records removed.
    pub long_term_removed: usize,
}

impl DecayReport {
    /// Total records removed across both tiers.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.working_removed + self.long_term_removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CharacterId, MemoryCategory};
    use chrono::Duration;

    fn aged(importance: f32, hours: i64, now: DateTime<Utc>) -> MemoryRecord {
        MemoryRecord::new(
            CharacterId::new("c"),
            "x",
            MemoryCategory::Thought,
            importance,
            0.0,
            now - Duration::hours(hours),
        )
    }

    #[test]
    fn fresh_record_keeps_full_importance() {
        let now = Utc::now();
        let rec = aged(6.0, 0, now);
        assert!((effective_importance(&rec, now) - 6.0).abs() < 1e-3);
    }

    #[test]
    fn importance_decays_with_age() {
        let now = Utc::now();
        let rec = aged(6.0, 24 * 10, now);
        assert!(effective_importance(&rec, now) < 6.0);
    }

    #[test]
    fn access_count_boosts_but_stays_clamped() {
        let now = Utc::now();
        let mut rec = aged(9.5, 0, now);
        rec.access_count = 50;
        assert!((effective_importance(&rec, now) - 10.0).abs() < f32::EPSILON);
    }

    #[test]
    fn young_records_are_never_forgotten() {
        let now = Utc::now();
        let rec = aged(0.5, 1, now);
        assert!(!should_forget(&rec, now, 24.0, 3.0));
    }

    #[test]
    fn old_weak_records_are_forgotten() {
        let now = Utc::now();
        let rec = aged(1.0, 48, now);
        assert!(should_forget(&rec, now, 24.0, 3.0));
    }

    #[test]
    fn long_term_horizon_is_longer() {
        let now = Utc::now();
        let config = MemoryConfig::default();
        let rec = aged(1.0, 48, now);
        assert!(!should_forget_long_term(&rec, now, 24.0, 3.0, &config));
        let ancient = aged(1.0, 24 * 11, now);
        assert!(should_forget_long_term(&ancient, now, 24.0, 3.0, &config));
    }

    #[test]
    fn decay_rate_matches_record_constructor() {
        let rec = MemoryRecord::new(
            CharacterId::new("c"),
            "x",
            MemoryCategory::Thought,
            8.0,
            -0.5,
            Utc::now(),
        );
        assert!((decay_rate(8.0, -0.5) - rec.decay_rate).abs() < 1e-6);
    }
}
