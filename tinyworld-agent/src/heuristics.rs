//! Cheap text heuristics: category, importance, valence, fallbacks.
//!
//! Used when the model is not asked (or fails) to score an utterance, and
//! to pick a placeholder line when generation fails.

use tinyworld_core::MemoryCategory;

/// Lines spoken when generation fails.
pub const FALLBACK_UTTERANCES: &[&str] = &[
    "I find myself unable to express my thoughts clearly.",
    "Something stirs in my mind, but the words will not come.",
    "Let me sit with this silence a moment longer.",
    "My thoughts drift like mist. I will gather them again.",
];

/// Importance given to a stored fallback line; low enough to decay first.
pub const FALLBACK_IMPORTANCE: f32 = 1.0;

const INSIGHT_WORDS: &[&str] = &[
    "realize", "realise", "realized", "understand", "discover", "discovered", "epiphany", "truth",
    "finally",
];
const PERCEPTION_WORDS: &[&str] = &[
    "see", "saw", "notice", "hear", "look", "looks", "observe", "smell", "tree", "water", "sky",
    "path", "house",
];
const INTERACTION_WORDS: &[&str] = &[
    "hello", "friend", "stranger", "together", "speak", "talk", "greet", "someone", "us", "we",
];
const REFLECTION_WORDS: &[&str] = &[
    "wonder", "think", "perhaps", "why", "ponder", "question", "remember", "meaning", "purpose",
    "exist", "existence",
];

const POSITIVE_WORDS: &[&str] = &[
    "joy", "happy", "beautiful", "wonderful", "delight", "love", "peace", "hope", "calm", "grateful",
    "good", "warm", "bright", "glad",
];
const NEGATIVE_WORDS: &[&str] = &[
    "fear", "afraid", "sad", "lonely", "lost", "dark", "anger", "angry", "pain", "confused",
    "despair", "cold", "trapped", "unable",
];

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn hits(words: &[String], vocabulary: &[&str]) -> usize {
    words.iter().filter(|w| vocabulary.contains(&w.as_str())).count()
}

/// Keyword classification. Insight beats perception beats interaction
/// beats reflection; anything else is a thought.
#[must_use]
pub fn classify(utterance: &str) -> MemoryCategory {
    let words = words(utterance);
    if hits(&words, INSIGHT_WORDS) >= 2 || (hits(&words, INSIGHT_WORDS) == 1 && words.iter().any(|w| w == "i")) {
        MemoryCategory::Insight
    } else if hits(&words, PERCEPTION_WORDS) > 0 {
        MemoryCategory::Perception
    } else if hits(&words, INTERACTION_WORDS) > 0 {
        MemoryCategory::Interaction
    } else if hits(&words, REFLECTION_WORDS) > 0 {
        MemoryCategory::Reflection
    } else {
        MemoryCategory::Thought
    }
}

/// Importance from category, questions and emotional charge, in `[0, 10]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn importance(utterance: &str, category: MemoryCategory) -> f32 {
    let base = match category {
        MemoryCategory::Insight => 8.0,
        MemoryCategory::Reflection => 5.5,
        MemoryCategory::Interaction => 5.0,
        MemoryCategory::Perception => 4.0,
        MemoryCategory::Thought => 3.5,
    };
    let question = if utterance.contains('?') { 0.5 } else { 0.0 };
    let charge = valence(utterance).abs() * 1.5;
    let length = (utterance.chars().count() as f32 / 200.0).min(1.0);
    (base + question + charge + length).clamp(0.0, 10.0)
}

/// Valence from positive and negative word counts, in `[-1, 1]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn valence(utterance: &str) -> f32 {
    let words = words(utterance);
    let positive = hits(&words, POSITIVE_WORDS) as f32;
    let negative = hits(&words, NEGATIVE_WORDS) as f32;
    if positive + negative == 0.0 {
        return 0.0;
    }
    ((positive - negative) / (positive + negative + 1.0)).clamp(-1.0, 1.0)
}

/// Placeholder for cycle `cycle`; rotates through [`FALLBACK_UTTERANCES`].
#[must_use]
pub fn fallback_utterance(cycle: u64) -> &'static str {
    let len = FALLBACK_UTTERANCES.len() as u64;
    let idx = usize::try_from(cycle % len).unwrap_or_default();
    FALLBACK_UTTERANCES[idx]
}

/// Trim and cut `text` to at most `max_chars` characters.
///
/// Returns the text and whether it was cut.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((byte, _)) => (trimmed[..byte].trim_end().to_string(), true),
        None => (trimmed.to_string(), false),
    }
}
