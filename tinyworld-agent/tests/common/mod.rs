//! Scripted adapters and helpers shared by the runtime tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tinyworld_agent::{CharacterProfile, Workflow, WorkflowSettings};
use tinyworld_core::{
    CharacterId, MemoryBackend, MemoryError, MemoryId, MemoryRecord, MemoryStore, MemoryTier,
    InMemoryBackend,
};
use tinyworld_core::config::{MemoryConfig, RetrievalConfig};
use tinyworld_core::embedding::HashingEmbeddingProvider;
use tinyworld_llm::{
    Evaluation, GenerationAdapter, LlmError, MovementTarget, PerceptionAdapter, Position,
    Reflection, Snapshot, WorldBounds,
};

pub const THOUGHT: &str = "I wonder what lies beyond the hills.";

/// Generation adapter driven by fixed answers.
pub struct ScriptedGenerator {
    pub utterance: String,
    pub wants_to_move: bool,
    pub reflect_delay: Duration,
    pub fail_reflect: bool,
    pub panic_once: AtomicBool,
    /// `None` makes `plan_target` answer with a malformed response.
    pub target: Option<Position>,
    pub evaluation: Evaluation,
    pub reflect_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub contexts: Mutex<Vec<String>>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self {
            utterance: THOUGHT.to_string(),
            wants_to_move: false,
            reflect_delay: Duration::ZERO,
            fail_reflect: false,
            panic_once: AtomicBool::new(false),
            target: None,
            evaluation: Evaluation {
                importance: 9.5,
                valence: 0.2,
            },
            reflect_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedGenerator {
    pub fn saying(utterance: &str) -> Self {
        Self {
            utterance: utterance.to_string(),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            reflect_delay: delay,
            ..Self::default()
        }
    }

    pub fn last_context(&self) -> String {
        self.contexts.lock().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl GenerationAdapter for ScriptedGenerator {
    async fn reflect(&self, context: &str) -> Result<Reflection, LlmError> {
        self.reflect_calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().push(context.to_string());
        if self.panic_once.swap(false, Ordering::SeqCst) {
            panic!("scripted panic");
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.reflect_delay.is_zero() {
            tokio::time::sleep(self.reflect_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_reflect {
            return Err(LlmError::Unavailable("scripted outage".into()));
        }
        Ok(Reflection {
            utterance: self.utterance.clone(),
            wants_to_move: self.wants_to_move,
        })
    }

    async fn plan_target(
        &self,
        _utterance: &str,
        _snapshot: &Snapshot,
        _position: Position,
        bounds: WorldBounds,
    ) -> Result<MovementTarget, LlmError> {
        match self.target {
            Some(p) => Ok(MovementTarget {
                position: bounds.clamp(p),
                reason: "curiosity".into(),
            }),
            None => Err(LlmError::SchemaValidation("target needs numeric x and y".into())),
        }
    }

    async fn evaluate(&self, _utterance: &str) -> Result<Evaluation, LlmError> {
        Ok(self.evaluation)
    }
}

/// Perception adapter with a fixed answer.
pub struct ScriptedEyes(pub Result<String, ()>);

#[async_trait]
impl PerceptionAdapter for ScriptedEyes {
    async fn describe(
        &self,
        _snapshot: &Snapshot,
        _position: Option<Position>,
    ) -> Result<String, LlmError> {
        self.0
            .clone()
            .map_err(|()| LlmError::ParseError("no description".into()))
    }
}

/// Backend whose writes always fail.
#[derive(Default)]
pub struct ReadOnlyBackend {
    inner: InMemoryBackend,
}

impl MemoryBackend for ReadOnlyBackend {
    fn put(&self, _tier: MemoryTier, _record: &MemoryRecord) -> tinyworld_core::error::Result<()> {
        Err(MemoryError::unavailable("put", "read-only"))
    }

    fn get(
        &self,
        c: &CharacterId,
        tier: MemoryTier,
        id: MemoryId,
    ) -> tinyworld_core::error::Result<Option<MemoryRecord>> {
        self.inner.get(c, tier, id)
    }

    fn remove(&self, c: &CharacterId, tier: MemoryTier, id: MemoryId) -> tinyworld_core::error::Result<bool> {
        self.inner.remove(c, tier, id)
    }

    fn list(&self, c: &CharacterId, tier: MemoryTier) -> tinyworld_core::error::Result<Vec<MemoryRecord>> {
        self.inner.list(c, tier)
    }

    fn count(&self, c: &CharacterId, tier: MemoryTier) -> tinyworld_core::error::Result<usize> {
        self.inner.count(c, tier)
    }

    fn clear(&self, c: &CharacterId) -> tinyworld_core::error::Result<usize> {
        self.inner.clear(c)
    }
}

/// Backend whose writes take `put_delay`; counts overlapping writes.
#[derive(Default)]
pub struct SlowBackend {
    inner: InMemoryBackend,
    pub put_delay: Duration,
    pub puts: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl SlowBackend {
    pub fn new(put_delay: Duration) -> Self {
        Self {
            put_delay,
            ..Self::default()
        }
    }
}

impl MemoryBackend for SlowBackend {
    fn put(&self, tier: MemoryTier, record: &MemoryRecord) -> tinyworld_core::error::Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.put_delay);
        let result = self.inner.put(tier, record);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.puts.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn get(
        &self,
        c: &CharacterId,
        tier: MemoryTier,
        id: MemoryId,
    ) -> tinyworld_core::error::Result<Option<MemoryRecord>> {
        self.inner.get(c, tier, id)
    }

    fn remove(&self, c: &CharacterId, tier: MemoryTier, id: MemoryId) -> tinyworld_core::error::Result<bool> {
        self.inner.remove(c, tier, id)
    }

    fn list(&self, c: &CharacterId, tier: MemoryTier) -> tinyworld_core::error::Result<Vec<MemoryRecord>> {
        self.inner.list(c, tier)
    }

    fn count(&self, c: &CharacterId, tier: MemoryTier) -> tinyworld_core::error::Result<usize> {
        self.inner.count(c, tier)
    }

    fn clear(&self, c: &CharacterId) -> tinyworld_core::error::Result<usize> {
        self.inner.clear(c)
    }
}

pub fn profile(id: &str, name: &str) -> CharacterProfile {
    CharacterProfile {
        id: CharacterId::new(id),
        name: name.to_string(),
        ..CharacterProfile::socrates()
    }
}

/// Short timeouts so failure scenarios finish quickly.
pub fn fast_settings() -> WorkflowSettings {
    WorkflowSettings {
        generation_timeout: Duration::from_millis(200),
        perception_timeout: Duration::from_millis(200),
        persistence_timeout: Duration::from_secs(2),
        ..WorkflowSettings::default()
    }
}

pub fn store_for(profile: &CharacterProfile, backend: Arc<dyn MemoryBackend>) -> Arc<MemoryStore> {
    let retrieval = RetrievalConfig::default();
    Arc::new(
        MemoryStore::open(
            profile.id.clone(),
            backend,
            Arc::new(HashingEmbeddingProvider::new(retrieval.embedding_dimensions)),
            MemoryConfig::default(),
            retrieval,
        )
        .expect("store"),
    )
}

pub fn workflow_with(
    profile: CharacterProfile,
    generator: Arc<ScriptedGenerator>,
    settings: WorkflowSettings,
) -> Workflow {
    let store = store_for(&profile, Arc::new(InMemoryBackend::new()));
    Workflow::new(profile, store, generator, settings)
}

pub fn socrates(generator: Arc<ScriptedGenerator>) -> Workflow {
    workflow_with(profile("socrates_001", "Socrates"), generator, fast_settings())
}

pub fn snapshot() -> Snapshot {
    Snapshot::png("iVBORw0KGgo=")
}
