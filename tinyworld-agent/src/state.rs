//! Per-cycle and per-character state.
//!
//! [`CycleState`] belongs to exactly one in-flight workflow run.
//! [`CharacterState`] is the domain state the scheduler keeps between
//! cycles; it is updated only through [`CharacterState::merge_from`],
//! which copies an explicit allow-list of fields. Scheduler timing
//! (last cycle time, in-progress flag) lives elsewhere and cannot be
//! touched by a merge.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tinyworld_core::{CharacterId, MemoryCategory, MemoryId};
use tinyworld_llm::{MovementTarget, Position};
use uuid::Uuid;

use crate::workflow::Step;

/// A step-boundary failure. Recorded, never propagated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFault {
    /// An adapter call exceeded its timeout.
    AdapterTimeout { step: Step },
    /// An adapter answered with something unusable.
    AdapterMalformedResponse { step: Step, detail: String },
    /// An adapter could not be reached or refused the call.
    AdapterUnavailable { step: Step, detail: String },
    /// The memory store failed or timed out.
    PersistenceUnavailable { step: Step, detail: String },
    /// A value was corrected into range.
    ValidationClamped { step: Step, field: &'static str },
}

impl StepFault {
    /// Step the fault happened in.
    #[must_use]
    pub fn step(&self) -> Step {
        match self {
            Self::AdapterTimeout { step }
            | Self::AdapterMalformedResponse { step, .. }
            | Self::AdapterUnavailable { step, .. }
            | Self::PersistenceUnavailable { step, .. }
            | Self::ValidationClamped { step, .. } => *step,
        }
    }

    /// Corrective faults that changed no outcome.
    #[must_use]
    pub fn is_corrective(&self) -> bool {
        matches!(self, Self::ValidationClamped { .. })
    }
}

impl fmt::Display for StepFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterTimeout { step } => write!(f, "{step}: adapter timed out"),
            Self::AdapterMalformedResponse { step, detail } => {
                write!(f, "{step}: malformed adapter response: {detail}")
            }
            Self::AdapterUnavailable { step, detail } => {
                write!(f, "{step}: adapter unavailable: {detail}")
            }
            Self::PersistenceUnavailable { step, detail } => {
                write!(f, "{step}: persistence unavailable: {detail}")
            }
            Self::ValidationClamped { step, field } => write!(f, "{step}: {field} clamped"),
        }
    }
}

/// How long one step took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepTiming {
    pub step: Step,
    pub elapsed_ms: u64,
}

/// State threaded through one workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct CycleState {
    pub character: CharacterId,
    pub run_id: Uuid,
    /// Sequence number, 1 for the first cycle.
    pub cycle: u64,
    pub perception: Option<String>,
    pub position: Option<Position>,
    pub utterance: String,
    /// True when the utterance came from the fallback set.
    pub used_fallback: bool,
    pub wants_to_move: bool,
    pub target: Option<MovementTarget>,
    /// Records that informed this cycle, most relevant first.
    pub recalled: Vec<MemoryId>,
    pub category: MemoryCategory,
    pub importance: f32,
    pub valence: f32,
    /// Id of the record written by PERSIST, if any.
    pub persisted: Option<MemoryId>,
    pub faults: Vec<StepFault>,
    pub timings: Vec<StepTiming>,
}

impl CycleState {
    /// Fresh state for cycle number `cycle`.
    #[must_use]
    pub fn new(character: CharacterId, cycle: u64) -> Self {
        Self {
            character,
            run_id: Uuid::new_v4(),
            cycle,
            perception: None,
            position: None,
            utterance: String::new(),
            used_fallback: false,
            wants_to_move: false,
            target: None,
            recalled: Vec::new(),
            category: MemoryCategory::Thought,
            importance: 0.0,
            valence: 0.0,
            persisted: None,
            faults: Vec::new(),
            timings: Vec::new(),
        }
    }

    /// Drop any movement intent.
    pub fn cancel_movement(&mut self) {
        self.wants_to_move = false;
        self.target = None;
    }
}

/// Domain state kept per character between cycles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterState {
    pub character: CharacterId,
    pub name: String,
    pub cycle_count: u64,
    pub last_utterance: Option<String>,
    pub perception: Option<String>,
    pub position: Option<Position>,
    pub wants_to_move: bool,
    pub target: Option<MovementTarget>,
    pub last_memory: Option<MemoryId>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CharacterState {
    /// Fields copied from a finished cycle. Nothing else is ever merged.
    pub const MERGED_FIELDS: &'static [&'static str] = &[
        "cycle_count",
        "last_utterance",
        "perception",
        "position",
        "wants_to_move",
        "target",
        "last_memory",
        "updated_at",
    ];

    /// Empty state for a newly registered character.
    #[must_use]
    pub fn new(character: CharacterId, name: impl Into<String>) -> Self {
        Self {
            character,
            name: name.into(),
            cycle_count: 0,
            last_utterance: None,
            perception: None,
            position: None,
            wants_to_move: false,
            target: None,
            last_memory: None,
            updated_at: None,
        }
    }

    /// Copy the allow-listed fields of a finished cycle.
    pub fn merge_from(&mut self, cycle: &CycleState, now: DateTime<Utc>) {
        self.cycle_count = cycle.cycle;
        self.last_utterance = Some(cycle.utterance.clone());
        if cycle.perception.is_some() {
            self.perception.clone_from(&cycle.perception);
        }
        if cycle.position.is_some() {
            self.position = cycle.position;
        }
        self.wants_to_move = cycle.target.is_some();
        self.target.clone_from(&cycle.target);
        if cycle.persisted.is_some() {
            self.last_memory = cycle.persisted;
        }
        self.updated_at = Some(now);
    }

    /// Clear domain state, keeping identity.
    pub fn reset(&mut self) {
        *self = Self::new(self.character.clone(), std::mem::take(&mut self.name));
    }
}
