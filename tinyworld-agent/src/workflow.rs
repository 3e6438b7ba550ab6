//! Decision workflow.
//!
//! One cycle walks a fixed sequence with a single conditional edge:
//!
//! ```text
//! OBSERVE → RECALL → GENERATE → EVALUATE → PERSIST ─┬─────────────────→ FINALIZE
//!                                                   └→ PLAN_MOVEMENT ─→ FINALIZE
//! ```
//!
//! PLAN_MOVEMENT runs only when the character wants to move and the
//! trigger carried both a snapshot and a position. Every adapter and
//! store call is bounded by a timeout; failures become [`StepFault`]s and
//! fixed fallbacks, so a cycle always reaches FINALIZE.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tinyworld_core::config::TinyWorldConfig;
use tinyworld_core::types::{clamp_importance, clamp_valence};
use tinyworld_core::{Context, DecayReport, MemoryCategory, MemoryId, MemoryStore};
use tinyworld_llm::{GenerationAdapter, LlmError, PerceptionAdapter, Position, WorldBounds};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::Trigger;
use crate::heuristics;
use crate::profile::CharacterProfile;
use crate::state::{CharacterState, CycleState, StepFault, StepTiming};

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One stage of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Observe,
    Recall,
    Generate,
    Evaluate,
    Persist,
    PlanMovement,
    Finalize,
}

impl Step {
    /// Stage after `self`, or `None` after FINALIZE.
    #[must_use]
    pub fn next(self, wants_to_move: bool, can_plan: bool) -> Option<Self> {
        match self {
            Self::Observe => Some(Self::Recall),
            Self::Recall => Some(Self::Generate),
            Self::Generate => Some(Self::Evaluate),
            Self::Evaluate => Some(Self::Persist),
            Self::Persist if wants_to_move && can_plan => Some(Self::PlanMovement),
            Self::Persist | Self::PlanMovement => Some(Self::Finalize),
            Self::Finalize => None,
        }
    }

    /// Lower-case name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Recall => "recall",
            Self::Generate => "generate",
            Self::Evaluate => "evaluate",
            Self::Persist => "persist",
            Self::PlanMovement => "plan_movement",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Timeouts, cadences and limits for one workflow.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub generation_timeout: Duration,
    pub perception_timeout: Duration,
    pub persistence_timeout: Duration,
    /// Decay runs when `cycle % decay_every_cycles == 0`; 0 disables.
    pub decay_every_cycles: u64,
    pub decay_max_age: chrono::Duration,
    pub decay_importance_floor: f32,
    pub max_utterance_chars: usize,
    pub recent_limit: usize,
    pub similar_limit: usize,
    /// Records kept after the RECALL merge.
    pub recall_top_k: usize,
    pub min_similarity: f32,
    pub recency_weight: f32,
    pub similarity_weight: f32,
    /// Score utterances with the model instead of the heuristic.
    pub evaluate_with_model: bool,
    pub bounds: WorldBounds,
    /// Farthest a planned target may be from the current position.
    pub movement_radius: f32,
}

impl WorkflowSettings {
    /// Settings from the relevant config sections.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_config(config: &TinyWorldConfig) -> Self {
        let wf = &config.workflow;
        let max_age_ms = (config.memory.decay_max_age_hours * 3_600_000.0) as i64;
        Self {
            generation_timeout: Duration::from_millis(wf.generation_timeout_ms),
            perception_timeout: Duration::from_millis(wf.perception_timeout_ms),
            persistence_timeout: Duration::from_millis(wf.persistence_timeout_ms),
            decay_every_cycles: wf.decay_every_cycles,
            decay_max_age: chrono::Duration::milliseconds(max_age_ms),
            decay_importance_floor: config.memory.decay_importance_floor,
            max_utterance_chars: wf.max_utterance_chars,
            recent_limit: wf.recent_limit,
            similar_limit: wf.similar_limit,
            recall_top_k: config.retrieval.top_k,
            min_similarity: config.retrieval.min_similarity,
            recency_weight: config.retrieval.recency_weight,
            similarity_weight: config.retrieval.similarity_weight,
            evaluate_with_model: config.llm.evaluate_with_model,
            bounds: WorldBounds::new(config.world.width, config.world.height),
            movement_radius: config.world.movement_radius,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from_config(&TinyWorldConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub state: CycleState,
    /// Present when FINALIZE ran a decay pass.
    pub decay: Option<DecayReport>,
    pub elapsed_ms: u64,
}

impl CycleReport {
    /// Faults recorded during the cycle.
    #[must_use]
    pub fn faults(&self) -> &[StepFault] {
        &self.state.faults
    }

    /// No fault other than corrective clamps.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.state.faults.iter().all(StepFault::is_corrective)
    }

    /// Steps that ran, in order.
    #[must_use]
    pub fn steps(&self) -> Vec<Step> {
        self.state.timings.iter().map(|t| t.step).collect()
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// The decision workflow for one character.
pub struct Workflow {
    profile: CharacterProfile,
    store: Arc<MemoryStore>,
    generator: Arc<dyn GenerationAdapter>,
    perception: Option<Arc<dyn PerceptionAdapter>>,
    settings: WorkflowSettings,
    /// A store call that outlived its timeout, still settling.
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("character", &self.profile.id)
            .field("perception", &self.perception.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

struct Recalled {
    id: MemoryId,
    content: String,
    score: f32,
}

impl Workflow {
    /// Build a workflow.
    #[must_use]
    pub fn new(
        profile: CharacterProfile,
        store: Arc<MemoryStore>,
        generator: Arc<dyn GenerationAdapter>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            profile,
            store,
            generator,
            perception: None,
            settings,
            pending: Mutex::new(None),
        }
    }

    /// Describe snapshots with `perception` during OBSERVE.
    #[must_use]
    pub fn with_perception(mut self, perception: Arc<dyn PerceptionAdapter>) -> Self {
        self.perception = Some(perception);
        self
    }

    /// Who this workflow drives.
    #[must_use]
    pub fn profile(&self) -> &CharacterProfile {
        &self.profile
    }

    /// The character's memory store.
    #[must_use]
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Run one cycle. Never fails; faults are recorded on the state.
    pub async fn run(&self, trigger: Trigger, prior: CharacterState) -> CycleReport {
        let started = Instant::now();
        let mut state = CycleState::new(self.profile.id.clone(), prior.cycle_count + 1);
        let can_plan = trigger.snapshot.is_some() && trigger.position.is_some();
        let mut excerpts = Vec::new();
        let mut decay = None;

        let mut step = Some(Step::Observe);
        while let Some(current) = step {
            let step_started = Instant::now();
            match current {
                Step::Observe => self.observe(&trigger, &mut state).await,
                Step::Recall => excerpts = self.recall(&prior, &mut state).await,
                Step::Generate => self.generate(&trigger, &excerpts, &mut state).await,
                Step::Evaluate => self.evaluate(&mut state).await,
                Step::Persist => self.persist(&trigger, &mut state).await,
                Step::PlanMovement => self.plan_movement(&trigger, &mut state).await,
                Step::Finalize => decay = self.finalize(&mut state).await,
            }
            let elapsed_ms = millis(step_started.elapsed());
            debug!(
                character = %state.character,
                run_id = %state.run_id,
                cycle = state.cycle,
                step = %current,
                elapsed_ms,
                "step finished"
            );
            state.timings.push(StepTiming {
                step: current,
                elapsed_ms,
            });
            step = current.next(state.wants_to_move, can_plan);
        }

        let elapsed_ms = millis(started.elapsed());
        info!(
            character = %state.character,
            run_id = %state.run_id,
            cycle = state.cycle,
            elapsed_ms,
            faults = state.faults.len(),
            fallback = state.used_fallback,
            moving = state.target.is_some(),
            "cycle complete"
        );
        CycleReport {
            state,
            decay,
            elapsed_ms,
        }
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    async fn observe(&self, trigger: &Trigger, state: &mut CycleState) {
        state.position = trigger.position;
        if let Some(text) = trigger.perception.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            state.perception = Some(text.to_string());
            return;
        }
        let (Some(eyes), Some(snapshot)) = (&self.perception, &trigger.snapshot) else {
            return;
        };
        let described = bounded(
            Step::Observe,
            self.settings.perception_timeout,
            eyes.describe(snapshot, trigger.position),
        )
        .await;
        match described {
            Ok(text) => state.perception = Some(text),
            Err(fault) => record(state, fault),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    async fn recall(&self, prior: &CharacterState, state: &mut CycleState) -> Vec<String> {
        let recent_limit = self.settings.recent_limit;
        let recent = self
            .with_store(Step::Recall, move |store| store.recall_recent(recent_limit), ignore_late)
            .await;
        let recent = match recent {
            Ok(records) => records,
            Err(fault) => {
                record(state, fault);
                Vec::new()
            }
        };

        let mut similar = Vec::new();
        if let Some(query) = prior.last_utterance.clone() {
            let (limit, min) = (self.settings.similar_limit, self.settings.min_similarity);
            match self
                .with_store(
                    Step::Recall,
                    move |store| Ok(store.recall_similar(&query, limit, min, true)),
                    ignore_late,
                )
                .await
            {
                Ok(hits) => similar = hits,
                Err(fault) => record(state, fault),
            }
        }

        let mut merged: Vec<Recalled> = Vec::with_capacity(recent.len() + similar.len());
        for (rank, rec) in recent.into_iter().enumerate() {
            merged.push(Recalled {
                id: rec.id,
                content: rec.content,
                score: self.settings.recency_weight / (1.0 + rank as f32),
            });
        }
        for hit in similar {
            let bonus = self.settings.similarity_weight * hit.similarity.max(0.0);
            if let Some(existing) = merged.iter_mut().find(|m| m.id == hit.record.id) {
                existing.score += bonus;
            } else {
                merged.push(Recalled {
                    id: hit.record.id,
                    content: hit.record.content,
                    score: bonus,
                });
            }
        }
        merged.sort_by(|a, b| b.score.total_cmp(&a.score));
        merged.truncate(self.settings.recall_top_k);

        state.recalled = merged.iter().map(|m| m.id).collect();
        merged.into_iter().map(|m| m.content).collect()
    }

    async fn generate(&self, trigger: &Trigger, excerpts: &[String], state: &mut CycleState) {
        let context = self.profile.compose_context(
            state.perception.as_deref(),
            excerpts,
            trigger.mission.as_deref(),
        );
        let reflected = bounded(
            Step::Generate,
            self.settings.generation_timeout,
            self.generator.reflect(&context),
        )
        .await;
        match reflected {
            Ok(reflection) => {
                let (utterance, cut) =
                    heuristics::truncate_chars(&reflection.utterance, self.settings.max_utterance_chars);
                if cut {
                    record(
                        state,
                        StepFault::ValidationClamped {
                            step: Step::Generate,
                            field: "utterance",
                        },
                    );
                }
                state.utterance = utterance;
                state.wants_to_move = reflection.wants_to_move;
            }
            Err(fault) => {
                record(state, fault);
                state.utterance = heuristics::fallback_utterance(state.cycle).to_string();
                state.used_fallback = true;
                state.wants_to_move = false;
            }
        }
    }

    async fn evaluate(&self, state: &mut CycleState) {
        if state.used_fallback {
            state.category = MemoryCategory::Thought;
            state.importance = heuristics::FALLBACK_IMPORTANCE;
            state.valence = 0.0;
            return;
        }
        state.category = heuristics::classify(&state.utterance);
        let (mut importance, mut valence) = (
            heuristics::importance(&state.utterance, state.category),
            heuristics::valence(&state.utterance),
        );
        if self.settings.evaluate_with_model {
            let scored = bounded(
                Step::Evaluate,
                self.settings.generation_timeout,
                self.generator.evaluate(&state.utterance),
            )
            .await;
            match scored {
                Ok(evaluation) => {
                    importance = evaluation.importance;
                    valence = evaluation.valence;
                }
                Err(fault) => record(state, fault),
            }
        }

        state.importance = clamp_importance(importance);
        state.valence = clamp_valence(valence);
        if state.importance.to_bits() != importance.to_bits() {
            record(state, StepFault::ValidationClamped { step: Step::Evaluate, field: "importance" });
        }
        if state.valence.to_bits() != valence.to_bits() {
            record(state, StepFault::ValidationClamped { step: Step::Evaluate, field: "valence" });
        }
    }

    async fn persist(&self, trigger: &Trigger, state: &mut CycleState) {
        let mut context = Context::new();
        context.insert("run_id".into(), state.run_id.to_string().into());
        context.insert("cycle".into(), state.cycle.into());
        context.insert("trigger".into(), serde_json::to_value(trigger.source).unwrap_or_default());
        if let Some(perception) = &state.perception {
            context.insert("perception".into(), perception.clone().into());
        }
        if state.used_fallback {
            context.insert("fallback".into(), true.into());
        }

        let content = state.utterance.clone();
        let (category, importance, valence) = (state.category, state.importance, state.valence);
        let stored = self
            .with_store(
                Step::Persist,
                move |store| store.store(&content, category, importance, valence, context),
                forget_late_record,
            )
            .await;
        match stored {
            Ok(id) => state.persisted = Some(id),
            Err(fault) => record(state, fault),
        }
    }

    async fn plan_movement(&self, trigger: &Trigger, state: &mut CycleState) {
        let (Some(snapshot), Some(position)) = (&trigger.snapshot, trigger.position) else {
            state.cancel_movement();
            return;
        };
        let planned = bounded(
            Step::PlanMovement,
            self.settings.generation_timeout,
            self.generator
                .plan_target(&state.utterance, snapshot, position, self.settings.bounds),
        )
        .await;
        match planned {
            Ok(mut target) => {
                let constrained = self.constrain_target(position, target.position);
                if constrained != target.position {
                    record(
                        state,
                        StepFault::ValidationClamped {
                            step: Step::PlanMovement,
                            field: "target_position",
                        },
                    );
                    target.position = constrained;
                }
                state.target = Some(target);
            }
            Err(fault) => {
                record(state, fault);
                state.cancel_movement();
            }
        }
    }

    async fn finalize(&self, state: &mut CycleState) -> Option<DecayReport> {
        if state.target.is_none() {
            state.wants_to_move = false;
        }
        let every = self.settings.decay_every_cycles;
        if every == 0 || state.cycle % every != 0 {
            return None;
        }
        let (max_age, floor) = (self.settings.decay_max_age, self.settings.decay_importance_floor);
        match self
            .with_store(Step::Finalize, move |store| store.decay(max_age, floor), ignore_late)
            .await
        {
            Ok(report) => {
                info!(
                    character = %state.character,
                    cycle = state.cycle,
                    removed = report.removed(),
                    "memory decay pass"
                );
                Some(report)
            }
            Err(fault) => {
                record(state, fault);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Clamp into the world, then pull back inside the movement radius.
    fn constrain_target(&self, from: Position, to: Position) -> Position {
        let bounds = self.settings.bounds;
        let to = bounds.clamp(to);
        let distance = from.distance(to);
        let radius = self.settings.movement_radius.max(0.0);
        if distance <= radius || distance == 0.0 {
            return to;
        }
        let scale = radius / distance;
        bounds.clamp(Position::new(
            from.x + (to.x - from.x) * scale,
            from.y + (to.y - from.y) * scale,
        ))
    }

    /// Run a blocking store call off the runtime, bounded by the
    /// persistence timeout.
    ///
    /// A call that times out keeps running on the blocking pool. Its handle
    /// is parked in `pending` and `late` is applied to whatever it returns,
    /// so a write the cycle already gave up on is undone once it lands. The
    /// next store call waits for that first.
    async fn with_store<T, F>(
        &self,
        step: Step,
        call: F,
        late: fn(&MemoryStore, T),
    ) -> Result<T, StepFault>
    where
        T: Send + 'static,
        F: FnOnce(&MemoryStore) -> tinyworld_core::error::Result<T> + Send + 'static,
    {
        self.settle_pending(step).await?;
        let store = Arc::clone(&self.store);
        let mut task = tokio::task::spawn_blocking(move || call(&store));
        let outcome = tokio::time::timeout(self.settings.persistence_timeout, &mut task).await;
        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(StepFault::PersistenceUnavailable {
                step,
                detail: e.to_string(),
            }),
            Ok(Err(join)) => Err(StepFault::PersistenceUnavailable {
                step,
                detail: join.to_string(),
            }),
            Err(_) => {
                let store = Arc::clone(&self.store);
                let character = self.profile.id.clone();
                let reconcile = tokio::spawn(async move {
                    if let Ok(Ok(value)) = task.await {
                        debug!(%character, ?step, "late store result reconciled");
                        if let Err(e) =
                            tokio::task::spawn_blocking(move || late(&store, value)).await
                        {
                            warn!(%character, ?step, error = %e, "late store reconciliation failed");
                        }
                    }
                });
                *self.pending.lock() = Some(reconcile);
                Err(StepFault::PersistenceUnavailable {
                    step,
                    detail: format!(
                        "timed out after {}ms; late result will be discarded",
                        millis(self.settings.persistence_timeout)
                    ),
                })
            }
        }
    }

    /// Wait for a store call left behind by an earlier timeout. Fails if it
    /// is still running after another persistence timeout.
    async fn settle_pending(&self, step: Step) -> Result<(), StepFault> {
        let parked = self.pending.lock().take();
        let Some(mut handle) = parked else {
            return Ok(());
        };
        let settled = tokio::time::timeout(self.settings.persistence_timeout, &mut handle).await;
        if settled.is_err() {
            *self.pending.lock() = Some(handle);
            return Err(StepFault::PersistenceUnavailable {
                step,
                detail: "earlier store call still running".into(),
            });
        }
        Ok(())
    }
}

fn ignore_late<T>(_: &MemoryStore, _: T) {}

/// Undo a write whose PERSIST step already reported failure.
fn forget_late_record(store: &MemoryStore, id: MemoryId) {
    match store.forget(id) {
        Ok(_) => debug!(%id, "late write forgotten"),
        Err(e) => warn!(%id, error = %e, "failed to forget late write"),
    }
}

/// Await an adapter call under `limit`, mapping every failure to a fault.
async fn bounded<T>(
    step: Step,
    limit: Duration,
    call: impl Future<Output = Result<T, LlmError>>,
) -> Result<T, StepFault> {
    match tokio::time::timeout(limit, call).await {
        Err(_) => Err(StepFault::AdapterTimeout { step }),
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.is_timeout() => Err(StepFault::AdapterTimeout { step }),
        Ok(Err(e)) if e.is_malformed() => Err(StepFault::AdapterMalformedResponse {
            step,
            detail: e.to_string(),
        }),
        Ok(Err(e)) => Err(StepFault::AdapterUnavailable {
            step,
            detail: e.to_string(),
        }),
    }
}

fn record(state: &mut CycleState, fault: StepFault) {
    if fault.is_corrective() {
        debug!(character = %state.character, cycle = state.cycle, %fault, "value clamped");
    } else {
        warn!(
            character = %state.character,
            run_id = %state.run_id,
            cycle = state.cycle,
            step = %fault.step(),
            %fault,
            "step fault"
        );
    }
    state.faults.push(fault);
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
