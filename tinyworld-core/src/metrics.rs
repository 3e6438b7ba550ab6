//! Memory store counters.
//!
//! Lock-free `AtomicU64` counters incremented on the hot path and read on
//! export. [`CounterSnapshot::to_prometheus`] renders the text exposition
//! format for scraping.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for memory store events.
#[derive(Debug)]
pub struct MemoryCounters {
    /// Records written to the working tier.
    pub stored: AtomicU64,
    /// `store` calls that failed after the retry.
    pub store_failures: AtomicU64,
    /// Records promoted (or re-promoted) into the long-term tier.
    pub consolidated: AtomicU64,
    /// Consolidation attempts that failed.
    pub consolidation_failures: AtomicU64,
    /// Records removed for capacity.
    pub evicted: AtomicU64,
    /// Records removed by decay.
    pub decayed: AtomicU64,
    /// Decay passes completed.
    pub decay_passes: AtomicU64,
    /// Recall queries served.
    pub recalls: AtomicU64,
    /// Similarity queries that failed and returned empty.
    pub recall_failures: AtomicU64,
}

impl MemoryCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stored: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            consolidated: AtomicU64::new(0),
            consolidation_failures: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            decayed: AtomicU64::new(0),
            decay_passes: AtomicU64::new(0),
            recalls: AtomicU64::new(0),
            recall_failures: AtomicU64::new(0),
        }
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            stored: self.stored.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            consolidated: self.consolidated.load(Ordering::Relaxed),
            consolidation_failures: self.consolidation_failures.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            decayed: self.decayed.load(Ordering::Relaxed),
            decay_passes: self.decay_passes.load(Ordering::Relaxed),
            recalls: self.recalls.load(Ordering::Relaxed),
            recall_failures: self.recall_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Records stored.
    pub stored: u64,
    /// Failed stores.
    pub store_failures: u64,
    /// Consolidations.
    pub consolidated: u64,
    /// Failed consolidations.
    pub consolidation_failures: u64,
    /// Capacity evictions.
    pub evicted: u64,
    /// Decay removals.
    pub decayed: u64,
    /// Decay passes.
    pub decay_passes: u64,
    /// Recall queries.
    pub recalls: u64,
    /// Failed similarity queries.
    pub recall_failures: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, u64); 9] = [
            ("tinyworld_memories_stored_total", "Records stored in the working tier", self.stored),
            ("tinyworld_store_failures_total", "Store calls dropped after retry", self.store_failures),
            ("tinyworld_consolidations_total", "Records promoted to long-term", self.consolidated),
            (
                "tinyworld_consolidation_failures_total",
                "Failed consolidations",
                self.consolidation_failures,
            ),
            ("tinyworld_evictions_total", "Records evicted for capacity", self.evicted),
            ("tinyworld_decayed_total", "Records removed by decay", self.decayed),
            ("tinyworld_decay_passes_total", "Decay passes completed", self.decay_passes),
            ("tinyworld_recalls_total", "Recall queries served", self.recalls),
            ("tinyworld_recall_failures_total", "Similarity queries that failed", self.recall_failures),
        ];
        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }
        out
    }
}
