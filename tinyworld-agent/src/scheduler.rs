//! Single-flight cycle scheduler.
//!
//! One slot per registered character holds the workflow, the
//! domain state and the timing state. A trigger is admitted only if no
//! cycle is in flight for that character and the minimum interval has
//! elapsed (manual triggers skip the interval). Refused triggers are
//! dropped, never queued.
//!
//! After a cycle the slot is updated in a fixed order:
//!
//! 1. allow-listed merge of the cycle's fields into [`CharacterState`]
//! 2. `last_cycle_time = now` (strictly increasing)
//! 3. `in_progress = false`
//!
//! then the outbound event is published. Each write is appended to a
//! small per-character journal so the order can be inspected.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use tinyworld_core::config::SchedulerConfig;
use tinyworld_core::{CharacterId, Clock, system_clock};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::events::{AgentUpdate, OutboundEvent, Trigger};
use crate::publisher::StatePublisher;
use crate::state::CharacterState;
use crate::workflow::{CycleReport, Workflow};

// ---------------------------------------------------------------------------
// Outcomes & journal
// ---------------------------------------------------------------------------

/// Why a trigger was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A cycle for this character is running.
    InProgress,
    /// The minimum interval has not elapsed.
    TooSoon {
        /// Time until the next admissible trigger.
        remaining: Duration,
    },
}

/// Result of a trigger.
#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    /// The cycle ran and its state was merged.
    Completed(Box<CycleReport>),
    /// The trigger was dropped.
    Skipped(SkipReason),
}

impl TriggerOutcome {
    /// Whether a cycle ran.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The cycle report, if a cycle ran.
    #[must_use]
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped(_) => None,
        }
    }
}

/// A write to scheduler-owned state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateWrite {
    DomainMerge,
    CycleTime,
    Release,
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub write: StateWrite,
    pub cycle: u64,
    pub at: DateTime<Utc>,
}

/// Health view of one character.
#[derive(Debug, Clone, Serialize)]
pub struct CharacterStatus {
    pub id: CharacterId,
    pub name: String,
    pub in_progress: bool,
    pub cycle_count: u64,
    pub last_cycle_time: Option<DateTime<Utc>>,
}

/// Health view of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// At least one character is registered.
    pub healthy: bool,
    pub characters: Vec<CharacterStatus>,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Admission and timer settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub min_interval: Duration,
    pub tick: Duration,
    pub journal_capacity: usize,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            min_interval: Duration::try_from_secs_f64(config.min_interval_secs.max(0.0))
                .unwrap_or(Duration::MAX),
            tick: Duration::from_millis(config.tick_ms.max(1)),
            journal_capacity: config.journal_capacity,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

struct CharacterSlot {
    workflow: Arc<Workflow>,
    in_progress: AtomicBool,
    last_cycle_time: Mutex<Option<DateTime<Utc>>>,
    domain: Mutex<CharacterState>,
    journal: Mutex<VecDeque<JournalEntry>>,
}

impl CharacterSlot {
    fn journal(&self, write: StateWrite, cycle: u64, at: DateTime<Utc>, capacity: usize) {
        if capacity == 0 {
            return;
        }
        let mut journal = self.journal.lock();
        while journal.len() >= capacity {
            journal.pop_front();
        }
        journal.push_back(JournalEntry { write, cycle, at });
    }
}

/// Holds `in_progress` for one cycle; clears it when dropped, including
/// on panic or cancellation.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
    released: bool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag,
                released: false,
            })
    }

    fn release(mut self) {
        self.flag.store(false, Ordering::Release);
        self.released = true;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.flag.store(false, Ordering::Release);
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Registry of characters and the single-flight guard around their cycles.
pub struct CycleScheduler {
    slots: DashMap<CharacterId, Arc<CharacterSlot>>,
    publisher: Arc<dyn StatePublisher>,
    settings: SchedulerSettings,
    clock: Clock,
}

impl std::fmt::Debug for CycleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleScheduler")
            .field("characters", &self.slots.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CycleScheduler {
    /// Empty scheduler.
    #[must_use]
    pub fn new(settings: SchedulerSettings, publisher: Arc<dyn StatePublisher>) -> Self {
        Self {
            slots: DashMap::new(),
            publisher,
            settings,
            clock: system_clock(),
        }
    }

    /// Replace the wall clock used for admission and cycle timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Register a character's workflow.
    ///
    /// # Errors
    ///
    /// `DuplicateCharacter` if the id is taken.
    pub fn register(&self, workflow: Workflow) -> Result<()> {
        let profile = workflow.profile();
        let id = profile.id.clone();
        let state = CharacterState::new(id.clone(), profile.name.clone());
        match self.slots.entry(id.clone()) {
            Entry::Occupied(_) => Err(AgentError::DuplicateCharacter(id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(CharacterSlot {
                    workflow: Arc::new(workflow),
                    in_progress: AtomicBool::new(false),
                    last_cycle_time: Mutex::new(None),
                    domain: Mutex::new(state),
                    journal: Mutex::new(VecDeque::new()),
                }));
                info!(character = %id, "character registered");
                Ok(())
            }
        }
    }

    /// Remove a character. A running cycle finishes, but its result is
    /// neither merged nor published.
    pub fn unregister(&self, id: &CharacterId) -> bool {
        self.slots.remove(id).is_some()
    }

    /// Registered character ids.
    #[must_use]
    pub fn characters(&self) -> Vec<CharacterId> {
        self.slots.iter().map(|e| e.key().clone()).collect()
    }

    fn slot(&self, id: &CharacterId) -> Result<Arc<CharacterSlot>> {
        self.slots
            .get(id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| AgentError::UnknownCharacter(id.clone()))
    }

    fn remaining_interval(&self, slot: &CharacterSlot, now: DateTime<Utc>) -> Option<Duration> {
        let last = (*slot.last_cycle_time.lock())?;
        let elapsed = (now - last).to_std().unwrap_or_default();
        self.settings
            .min_interval
            .checked_sub(elapsed)
            .filter(|d| !d.is_zero())
    }

    /// Run one cycle if admissible.
    ///
    /// # Errors
    ///
    /// `UnknownCharacter` if nobody is registered under the trigger's id.
    /// Refused triggers are `Ok(TriggerOutcome::Skipped(_))`.
    pub async fn trigger(&self, trigger: Trigger) -> Result<TriggerOutcome> {
        let slot = self.slot(&trigger.character)?;
        let character = trigger.character.clone();

        let Some(guard) = InFlightGuard::acquire(&slot.in_progress) else {
            info!(character = %character, source = ?trigger.source, "trigger skipped: cycle in progress");
            return Ok(TriggerOutcome::Skipped(SkipReason::InProgress));
        };
        if !trigger.bypasses_interval() {
            if let Some(remaining) = self.remaining_interval(&slot, (self.clock)()) {
                info!(
                    character = %character,
                    remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                    "trigger skipped: too soon"
                );
                return Ok(TriggerOutcome::Skipped(SkipReason::TooSoon { remaining }));
            }
        }

        let prior = slot.domain.lock().clone();
        let report = slot.workflow.run(trigger, prior).await;
        let cycle = report.state.cycle;
        if !self.still_registered(&character, &slot) {
            guard.release();
            info!(character = %character, cycle, "character unregistered during cycle; result discarded");
            return Ok(TriggerOutcome::Completed(Box::new(report)));
        }
        let capacity = self.settings.journal_capacity;

        // 1. domain merge
        let merged_at = (self.clock)();
        let merged = {
            let mut domain = slot.domain.lock();
            domain.merge_from(&report.state, merged_at);
            domain.clone()
        };
        slot.journal(StateWrite::DomainMerge, cycle, merged_at, capacity);
        debug!(character = %character, cycle, fields = ?CharacterState::MERGED_FIELDS, "domain state merged");

        // 2. timing, strictly after the merge
        let cycle_time = {
            let mut last = slot.last_cycle_time.lock();
            let mut now = (self.clock)();
            if let Some(prev) = *last {
                if now <= prev {
                    now = prev + chrono::Duration::microseconds(1);
                }
            }
            *last = Some(now);
            now
        };
        slot.journal(StateWrite::CycleTime, cycle, cycle_time, capacity);
        debug!(character = %character, cycle, %cycle_time, "last cycle time updated");

        // 3. release
        guard.release();
        slot.journal(StateWrite::Release, cycle, (self.clock)(), capacity);

        self.publisher.publish(&outbound(&merged, cycle_time));
        Ok(TriggerOutcome::Completed(Box::new(report)))
    }

    /// The slot is still the one registered under `id`.
    fn still_registered(&self, id: &CharacterId, slot: &Arc<CharacterSlot>) -> bool {
        self.slots
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    fn is_due(&self, id: &CharacterId) -> bool {
        self.slot(id).is_ok_and(|slot| {
            !slot.in_progress.load(Ordering::Acquire)
                && self.remaining_interval(&slot, (self.clock)()).is_none()
        })
    }

    /// Trigger every due character on each tick until `shutdown` resolves,
    /// then wait for in-flight cycles.
    pub async fn run_timer(self: Arc<Self>, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);
        info!(tick_ms = u64::try_from(self.settings.tick.as_millis()).unwrap_or(u64::MAX), "timer loop started");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    while in_flight.try_join_next().is_some() {}
                    for id in self.characters() {
                        if !self.is_due(&id) {
                            continue;
                        }
                        let this = Arc::clone(&self);
                        in_flight.spawn(async move { this.trigger(Trigger::timer(id)).await });
                    }
                }
            }
        }

        info!(in_flight = in_flight.len(), "timer loop stopping");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "cycle task ended abnormally");
            }
        }
    }

    /// Clear a character's domain state. Timing state is kept, so a reset
    /// never makes a character due early.
    ///
    /// # Errors
    ///
    /// `UnknownCharacter` if not registered.
    pub fn reset(&self, id: &CharacterId) -> Result<()> {
        let slot = self.slot(id)?;
        slot.domain.lock().reset();
        info!(character = %id, "character state reset");
        Ok(())
    }

    /// Health overview.
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let mut characters: Vec<CharacterStatus> = self
            .slots
            .iter()
            .map(|entry| {
                let slot = entry.value();
                let domain = slot.domain.lock();
                CharacterStatus {
                    id: entry.key().clone(),
                    name: domain.name.clone(),
                    in_progress: slot.in_progress.load(Ordering::Acquire),
                    cycle_count: domain.cycle_count,
                    last_cycle_time: *slot.last_cycle_time.lock(),
                }
            })
            .collect();
        characters.sort_by(|a, b| a.id.cmp(&b.id));
        SchedulerStatus {
            healthy: !characters.is_empty(),
            characters,
        }
    }

    /// Snapshot of a character's domain state.
    #[must_use]
    pub fn character_state(&self, id: &CharacterId) -> Option<CharacterState> {
        self.slot(id).ok().map(|slot| slot.domain.lock().clone())
    }

    /// When the character's last cycle completed.
    #[must_use]
    pub fn last_cycle_time(&self, id: &CharacterId) -> Option<DateTime<Utc>> {
        self.slot(id).ok().and_then(|slot| *slot.last_cycle_time.lock())
    }

    /// Whether a cycle is running for the character.
    #[must_use]
    pub fn is_in_progress(&self, id: &CharacterId) -> bool {
        self.slot(id)
            .is_ok_and(|slot| slot.in_progress.load(Ordering::Acquire))
    }

    /// Recent scheduler writes for the character, oldest first.
    #[must_use]
    pub fn recent_writes(&self, id: &CharacterId) -> Vec<JournalEntry> {
        self.slot(id)
            .map(|slot| slot.journal.lock().iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn outbound(state: &CharacterState, at: DateTime<Utc>) -> OutboundEvent {
    let target = state.target.as_ref();
    OutboundEvent::AgentUpdate(AgentUpdate {
        character_id: state.character.clone(),
        character_name: state.name.clone(),
        utterance: state.last_utterance.clone().unwrap_or_default(),
        cycle: state.cycle_count,
        timestamp: at,
        wants_to_move: target.map(|_| true),
        target_position: target.map(|t| t.position),
        reason: target.map(|t| t.reason.clone()).filter(|r| !r.is_empty()),
    })
}
