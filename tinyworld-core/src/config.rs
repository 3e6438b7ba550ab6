//! Configuration for TinyWorld.
//!
//! Maps directly to `tinyworld.toml`. Every field has a serde default, so an
//! empty document is a valid configuration.

use serde::{Deserialize, Serialize};

/// Top-level TinyWorld configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TinyWorldConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Memory tier capacity and consolidation thresholds.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Similarity search settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Persistence backend settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Language model connection settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Trigger admission and timer settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Per-step timeouts and cadence of the decision workflow.
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// World geometry.
    #[serde(default)]
    pub world: WorldConfig,
    /// Identity of the character driven by the binary.
    #[serde(default)]
    pub character: CharacterConfig,
}

impl TinyWorldConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `MemoryError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::MemoryError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error. `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of the human format.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

/// Memory tier capacity, consolidation and decay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of records in the working tier.
    #[serde(default = "default_100")]
    pub working_capacity: usize,
    /// Importance at or above which a record is consolidated.
    #[serde(default = "default_7_0")]
    pub consolidation_importance: f32,
    /// Absolute valence at or above which a record is consolidated.
    #[serde(default = "default_0_7")]
    pub consolidation_valence: f32,
    /// Access count at or above which a record is consolidated.
    #[serde(default = "default_5_u32")]
    pub consolidation_access_count: u32,
    /// Maximum number of associations computed on consolidation.
    #[serde(default = "default_5_usize")]
    pub max_associations: usize,
    /// Minimum cosine similarity for an association.
    #[serde(default = "default_0_3")]
    pub association_min_similarity: f32,
    /// Working-tier records older than this (hours) are decay candidates.
    #[serde(default = "default_24_0")]
    pub decay_max_age_hours: f64,
    /// Effective importance below which an old record is removed.
    #[serde(default = "default_3_0")]
    pub decay_importance_floor: f32,
    /// Long-term records must be this many times older than `decay_max_age_hours`.
    #[serde(default = "default_10_0")]
    pub long_term_age_multiplier: f64,
    /// Long-term records decay at this fraction of their own rate.
    #[serde(default = "default_0_1")]
    pub long_term_decay_factor: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_capacity: 100,
            consolidation_importance: 7.0,
            consolidation_valence: 0.7,
            consolidation_access_count: 5,
            max_associations: 5,
            association_min_similarity: 0.3,
            decay_max_age_hours: 24.0,
            decay_importance_floor: 3.0,
            long_term_age_multiplier: 10.0,
            long_term_decay_factor: 0.1,
        }
    }
}

/// Similarity search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of records kept after the RECALL merge.
    #[serde(default = "default_8_usize")]
    pub top_k: usize,
    /// Default similarity cutoff for `recall_similar`.
    #[serde(default)]
    pub min_similarity: f32,
    /// Embedding provider: "hashing", "stub", "random".
    #[serde(default = "default_hashing")]
    pub embedding_provider: String,
    /// Embedding vector dimensions.
    #[serde(default = "default_256")]
    pub embedding_dimensions: usize,
    /// Cached embeddings (0 disables the cache).
    #[serde(default = "default_1024")]
    pub embedding_cache_size: usize,
    /// Long-term tier size above which the HNSW index replaces brute force.
    #[serde(default = "default_128")]
    pub ann_threshold: usize,
    /// Weight of the recency rank in the RECALL merge.
    #[serde(default = "default_0_5")]
    pub recency_weight: f32,
    /// Weight of the similarity rank in the RECALL merge.
    #[serde(default = "default_0_5")]
    pub similarity_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            min_similarity: 0.0,
            embedding_provider: default_hashing(),
            embedding_dimensions: 256,
            embedding_cache_size: 1024,
            ann_threshold: 128,
            recency_weight: 0.5,
            similarity_weight: 0.5,
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Backend: "sqlite" or "memory".
    #[serde(default = "default_sqlite")]
    pub backend: String,
    /// Database path for the SQLite backend.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Verify per-record checksums on load.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_sqlite(),
            path: default_db_path(),
            wal_mode: true,
            checksum_enabled: true,
        }
    }
}

/// Language model connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "ollama", "openai", "none".
    #[serde(default = "default_ollama")]
    pub provider: String,
    /// Base URL for the LLM API.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Model used for reflection and evaluation.
    #[serde(default = "default_text_model")]
    pub model: String,
    /// Vision-capable model used for perception and movement planning.
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    /// Optional API key for OpenAI-compatible endpoints.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Hard timeout for any single HTTP call in milliseconds.
    #[serde(default = "default_20000")]
    pub request_timeout_ms: u64,
    /// Retries after a failed call.
    #[serde(default = "default_2")]
    pub max_retries: u32,
    /// Sampling temperature.
    #[serde(default = "default_0_7")]
    pub temperature: f32,
    /// Use the model to score importance and valence instead of the heuristic.
    #[serde(default)]
    pub evaluate_with_model: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            base_url: default_ollama_url(),
            model: default_text_model(),
            vision_model: default_vision_model(),
            api_key: None,
            request_timeout_ms: 20_000,
            max_retries: 2,
            temperature: 0.7,
            evaluate_with_model: false,
        }
    }
}

/// Trigger admission and timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum seconds between two admitted cycles for one character.
    #[serde(default = "default_30_0")]
    pub min_interval_secs: f64,
    /// Timer loop tick in milliseconds.
    #[serde(default = "default_1000")]
    pub tick_ms: u64,
    /// Entries kept in each character's write-order journal.
    #[serde(default = "default_64")]
    pub journal_capacity: usize,
    /// Capacity of the outbound broadcast channel.
    #[serde(default = "default_256")]
    pub broadcast_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 30.0,
            tick_ms: 1000,
            journal_capacity: 64,
            broadcast_capacity: 256,
        }
    }
}

/// Decision workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Timeout for reflect / plan_target / evaluate calls (ms).
    #[serde(default = "default_20000")]
    pub generation_timeout_ms: u64,
    /// Timeout for the perception call (ms).
    #[serde(default = "default_20000")]
    pub perception_timeout_ms: u64,
    /// Timeout for each memory store call (ms).
    #[serde(default = "default_2000")]
    pub persistence_timeout_ms: u64,
    /// Run memory decay every this many cycles (0 disables).
    #[serde(default = "default_10_u64")]
    pub decay_every_cycles: u64,
    /// Utterances longer than this are truncated.
    #[serde(default = "default_400")]
    pub max_utterance_chars: usize,
    /// Recent records fetched during RECALL.
    #[serde(default = "default_5_usize")]
    pub recent_limit: usize,
    /// Similar records fetched during RECALL.
    #[serde(default = "default_5_usize")]
    pub similar_limit: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            generation_timeout_ms: 20_000,
            perception_timeout_ms: 20_000,
            persistence_timeout_ms: 2000,
            decay_every_cycles: 10,
            max_utterance_chars: 400,
            recent_limit: 5,
            similar_limit: 5,
        }
    }
}

/// World geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// World width in pixels.
    #[serde(default = "default_800_0")]
    pub width: f32,
    /// World height in pixels.
    #[serde(default = "default_600_0")]
    pub height: f32,
    /// Maximum distance of a planned target from the current position.
    #[serde(default = "default_160_0")]
    pub movement_radius: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            movement_radius: 160.0,
        }
    }
}

/// Character identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    /// Stable identifier used as the memory namespace.
    #[serde(default = "default_character_id")]
    pub id: String,
    /// Display name.
    #[serde(default = "default_character_name")]
    pub name: String,
    /// Free-text personality description.
    #[serde(default = "default_personality")]
    pub personality: String,
    /// What the character is trying to do.
    #[serde(default = "default_mission")]
    pub mission: String,
    /// Short trait list.
    #[serde(default = "default_core_traits")]
    pub core_traits: Vec<String>,
    /// How the character speaks.
    #[serde(default = "default_speaking_style")]
    pub speaking_style: String,
    /// Beliefs seeded into the prompt.
    #[serde(default = "default_initial_beliefs")]
    pub initial_beliefs: Vec<String>,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            id: default_character_id(),
            name: default_character_name(),
            personality: default_personality(),
            mission: default_mission(),
            core_traits: default_core_traits(),
            speaking_style: default_speaking_style(),
            initial_beliefs: default_initial_beliefs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_hashing() -> String { "hashing".to_string() }
fn default_sqlite() -> String { "sqlite".to_string() }
fn default_db_path() -> String { "tinyworld.db".to_string() }
fn default_ollama() -> String { "ollama".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_text_model() -> String { "llama3.2".to_string() }
fn default_vision_model() -> String { "llava".to_string() }
fn default_character_id() -> String { "socrates_001".to_string() }
fn default_character_name() -> String { "Socrates".to_string() }
fn default_personality() -> String {
    "A curious philosopher who questions everything, seeks wisdom through dialogue, \
     and admits the limits of his own knowledge."
        .to_string()
}
fn default_mission() -> String {
    "To understand the nature of this small world and his own existence within it.".to_string()
}
fn default_core_traits() -> Vec<String> {
    ["curious", "humble", "persistent", "ironic"].map(String::from).to_vec()
}
fn default_speaking_style() -> String {
    "Asks probing questions, speaks plainly, and reasons aloud step by step.".to_string()
}
fn default_initial_beliefs() -> Vec<String> {
    [
        "The unexamined life is not worth living.",
        "True wisdom is knowing that you know nothing.",
        "Virtue can be learned through questioning.",
    ]
    .map(String::from)
    .to_vec()
}
fn default_0_1() -> f32 { 0.1 }
fn default_0_3() -> f32 { 0.3 }
fn default_0_5() -> f32 { 0.5 }
fn default_0_7() -> f32 { 0.7 }
fn default_3_0() -> f32 { 3.0 }
fn default_7_0() -> f32 { 7.0 }
fn default_800_0() -> f32 { 800.0 }
fn default_600_0() -> f32 { 600.0 }
fn default_160_0() -> f32 { 160.0 }
fn default_10_0() -> f64 { 10.0 }
fn default_24_0() -> f64 { 24.0 }
fn default_30_0() -> f64 { 30.0 }
fn default_2() -> u32 { 2 }
fn default_5_u32() -> u32 { 5 }
fn default_5_usize() -> usize { 5 }
fn default_8_usize() -> usize { 8 }
fn default_10_u64() -> u64 { 10 }
fn default_64() -> usize { 64 }
fn default_100() -> usize { 100 }
fn default_128() -> usize { 128 }
fn default_256() -> usize { 256 }
fn default_400() -> usize { 400 }
fn default_1024() -> usize { 1024 }
fn default_1000() -> u64 { 1000 }
fn default_2000() -> u64 { 2000 }
fn default_20000() -> u64 { 20_000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = TinyWorldConfig::from_toml("").expect("empty toml");
        assert_eq!(cfg.memory.working_capacity, 100);
        assert_eq!(cfg.retrieval.top_k, 8);
        assert!((cfg.scheduler.min_interval_secs - 30.0).abs() < f64::EPSILON);
        assert_eq!(cfg.workflow.max_utterance_chars, 400);
        assert_eq!(cfg.character.name, "Socrates");
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let cfg = TinyWorldConfig::from_toml(
            r#"
            [memory]
            working_capacity = 10

            [world]
            width = 320.0
            "#,
        )
        .expect("valid toml");
        assert_eq!(cfg.memory.working_capacity, 10);
        assert!((cfg.memory.consolidation_importance - 7.0).abs() < f32::EPSILON);
        assert!((cfg.world.width - 320.0).abs() < f32::EPSILON);
        assert!((cfg.world.height - 600.0).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = TinyWorldConfig::from_toml("[memory\nworking_capacity = ").unwrap_err();
        assert!(matches!(err, crate::MemoryError::Config(_)));
    }
}
