//! Core type definitions for the TinyWorld memory engine.
//!
//! All persisted types are serializable; wall-clock time (`DateTime<Utc>`)
//! is the single time base for ages, recency and decay.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Identifier of a simulated character (e.g. `"socrates_001"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub String);

impl CharacterId {
    /// Create a character ID from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CharacterId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unique identifier for a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a new random memory ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MemoryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What kind of experience a record captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// Something the character sensed in the world.
    Perception,
    /// Looking back on earlier thoughts.
    Reflection,
    /// An exchange with someone or something else.
    Interaction,
    /// A realization worth keeping.
    Insight,
    /// Anything else the character said or thought.
    Thought,
}

impl MemoryCategory {
    /// Stable lowercase name, used in persisted layouts and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Perception => "perception",
            Self::Reflection => "reflection",
            Self::Interaction => "interaction",
            Self::Insight => "insight",
            Self::Thought => "thought",
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two storage tiers of a character's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Small, frequently churned set used for immediate context.
    Working,
    /// Larger, append-mostly set of consolidated records.
    LongTerm,
}

impl MemoryTier {
    /// Both tiers, working first.
    pub const ALL: [Self; 2] = [Self::Working, Self::LongTerm];

    /// Stable lowercase name, used as the collection key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::LongTerm => "long_term",
        }
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "working" => Ok(Self::Working),
            "long_term" => Ok(Self::LongTerm),
            other => Err(format!("unknown memory tier: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// Lower bound of the importance scale.
pub const IMPORTANCE_MIN: f32 = 0.0;
/// Upper bound of the importance scale.
pub const IMPORTANCE_MAX: f32 = 10.0;

/// Clamp an importance value into `[0, 10]`. NaN maps to the midpoint.
#[must_use]
pub fn clamp_importance(value: f32) -> f32 {
    if value.is_nan() {
        return 5.0;
    }
    value.clamp(IMPORTANCE_MIN, IMPORTANCE_MAX)
}

/// Clamp an emotional valence into `[-1, 1]`. NaN maps to neutral.
#[must_use]
pub fn clamp_valence(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(-1.0, 1.0)
}

// ---------------------------------------------------------------------------
// Memory Embedding Vector
// ---------------------------------------------------------------------------

/// A dense vector embedding for semantic similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Cosine similarity between two embeddings.
    /// Returns 0.0 if either vector is zero-length or dimensions differ.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Self) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom < f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    /// Dimensionality of the embedding.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }
}

// ---------------------------------------------------------------------------
// Memory Record
// ---------------------------------------------------------------------------

/// A single remembered item owned by one character.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier; shared by the working copy and its long-term copy.
    pub id: MemoryId,
    /// Owning character.
    pub character_id: CharacterId,
    /// The remembered text.
    pub content: String,
    /// When the record was first stored.
    pub created_at: DateTime<Utc>,
    /// Kind of experience.
    pub category: MemoryCategory,
    /// Significance in `[0, 10]`.
    pub importance: f32,
    /// Emotional colouring in `[-1, 1]`.
    pub emotional_valence: f32,
    /// How many times the record has been recalled.
    pub access_count: u32,
    /// Last time the record was recalled (or created).
    pub last_accessed: DateTime<Utc>,
    /// Exponential decay constant per day of age.
    pub decay_rate: f32,
    /// Nearest neighbours computed at consolidation.
    #[serde(default)]
    pub associations: Vec<MemoryId>,
    /// Free-form context (run id, cycle number, source, ...).
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    /// Set on the long-term copy when it was consolidated.
    #[serde(default)]
    pub consolidated_at: Option<DateTime<Utc>>,
    /// How many times consolidation has reinforced this record.
    #[serde(default)]
    pub reinforcement_count: u32,
    /// Vector embedding for similarity search.
    #[serde(default)]
    pub embedding: Option<Embedding>,
}

impl MemoryRecord {
    /// Create a new record, clamping importance and valence into range.
    #[must_use]
    pub fn new(
        character_id: CharacterId,
        content: impl Into<String>,
        category: MemoryCategory,
        importance: f32,
        emotional_valence: f32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let importance = clamp_importance(importance);
        let emotional_valence = clamp_valence(emotional_valence);
        let decay_rate = crate::decay::decay_rate(importance, emotional_valence);

        Self {
            id: MemoryId::new(),
            character_id,
            content: content.into(),
            created_at,
            category,
            importance,
            emotional_valence,
            access_count: 0,
            last_accessed: created_at,
            decay_rate,
            associations: Vec::new(),
            context: BTreeMap::new(),
            consolidated_at: None,
            reinforcement_count: 0,
            embedding: None,
        }
    }

    /// Attach a free-form context map.
    #[must_use]
    pub fn with_context(mut self, context: BTreeMap<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }

    /// Record an access (recall).
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if now > self.last_accessed {
            self.last_accessed = now;
        }
    }

    /// Age of the record in fractional hours (never negative).
    #[must_use]
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.created_at).num_milliseconds().max(0);
        millis as f64 / 3_600_000.0
    }
}

// ---------------------------------------------------------------------------
// Recall results
// ---------------------------------------------------------------------------

/// A record returned from a similarity query, with its score and tier.
#[derive(Debug, Clone)]
pub struct RecallHit {
    /// The matched record (access stats already updated).
    pub record: MemoryRecord,
    /// Cosine similarity to the query.
    pub similarity: f32,
    /// Which tier the record was read from.
    pub tier: MemoryTier,
}

/// Composite score used to order records, `Ord` through `OrderedFloat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Score(pub OrderedFloat<f64>);

impl Score {
    /// Create a score from a raw f64.
    #[must_use]
    pub fn new(score: f64) -> Self {
        Self(OrderedFloat(score))
    }

    /// Get the raw score value.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0.into_inner()
    }
}

/// Snapshot of a character's memory sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Records currently in the working tier.
    pub working: usize,
    /// Records currently in the long-term tier.
    pub long_term: usize,
    /// Creation time of the newest working record.
    pub last_memory_time: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Source of wall-clock time, injectable so tests can move time forward.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The real wall clock.
#[must_use]
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}
