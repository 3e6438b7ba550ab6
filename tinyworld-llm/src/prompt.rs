//! Prompt templates for TinyWorld LLM operations.
//!
//! Templates use `{key}` placeholders filled by [`render_template`]. JSON
//! examples inside templates use single braces; only known keys are
//! replaced.

/// Character context composed by the workflow before GENERATE.
pub const CHARACTER_CONTEXT: &str = r"You are {character_name}, newly awake in a small world you do not yet understand.

Personality: {personality}
Mission: {mission}
Core traits: {core_traits}
Speaking style: {speaking_style}
Beliefs you hold: {initial_beliefs}

What you currently see: {perception}

Thoughts and moments you remember:
{recent_memories}";

/// System prompt for the reflection call.
pub const REFLECTION_SYSTEM: &str = r#"Stay in character. Never mention being an AI or a model.
Speak one short reflection aloud, at most {max_chars} characters, only your own words.
Decide whether you want to walk somewhere to look more closely.
Return JSON only: {"utterance": "what you say", "wants_to_move": true or false}"#;

/// System prompt for movement planning from a snapshot.
pub const PLAN_TARGET_SYSTEM: &str = r#"You choose where a character walks next in a 2D world seen from above.
Coordinates are pixels with the origin at the top-left corner.
Return JSON only: {"x": <number>, "y": <number>, "reason": "short reason"}"#;

/// User prompt for movement planning.
pub const PLAN_TARGET_USER: &str = r"The character just said: {utterance}
The character stands at x={x}, y={y}.
The world is {width} wide and {height} high.
Pick a point in the attached image that the character would want to walk to.";

/// System prompt for scoring a new memory.
pub const EVALUATE_SYSTEM: &str = r#"You rate how memorable a thought is for the character who had it.
importance: 0 (trivial) to 10 (life-changing).
valence: -1 (very negative) to 1 (very positive).
Return JSON only: {"importance": <number>, "valence": <number>}"#;

/// User prompt for scoring a new memory.
pub const EVALUATE_USER: &str = r"Thought: {utterance}";

/// System prompt for describing a snapshot.
pub const DESCRIBE_SYSTEM: &str = r"You describe what a character can see in a small 2D world.
Answer in one or two plain sentences. Mention notable objects, people and places.";

/// User prompt for describing a snapshot.
pub const DESCRIBE_USER: &str = r"The character stands {position}. What is around them?";

/// Render a template by replacing `{key}` placeholders with values.
///
/// # Example
///
/// ```
/// use tinyworld_llm::prompt::render_template;
///
/// let t = "Hello, {name}!";
/// let result = render_template(t, &[("name", "Socrates")]);
/// assert_eq!(result, "Hello, Socrates!");
/// ```
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// Remaining `{key}` placeholders in a rendered prompt.
///
/// JSON examples like `{"x": 1}` are not placeholders and are skipped.
#[must_use]
pub fn unfilled_placeholders(rendered: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = rendered;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else { break };
        let key = &after[..close];
        if !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            found.push(key);
        }
        rest = &after[close + 1..];
    }
    found
}
