//! Generation and perception adapters.
//!
//! The workflow talks to language models only through these traits. The
//! LLM-backed implementations validate every response at the boundary:
//! numbers are clamped, optional fields defaulted, and anything unusable
//! becomes a typed [`LlmError`] instead of leaking raw model output.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::client::{LlmClient, parse_json_object};
use crate::error::LlmError;
use crate::prompt::{self, render_template};
use crate::types::{
    Evaluation, LlmRequest, MovementTarget, Position, Reflection, Snapshot, WorldBounds,
};

/// Produces utterances, movement targets and memory scores.
#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    /// Speak a reflection given the composed character context.
    async fn reflect(&self, context: &str) -> Result<Reflection, LlmError>;

    /// Choose a target in the snapshot. The result lies inside `bounds`.
    async fn plan_target(
        &self,
        utterance: &str,
        snapshot: &Snapshot,
        position: Position,
        bounds: WorldBounds,
    ) -> Result<MovementTarget, LlmError>;

    /// Score an utterance for storage.
    async fn evaluate(&self, utterance: &str) -> Result<Evaluation, LlmError>;
}

/// Turns a visual snapshot into a short scene description.
#[async_trait]
pub trait PerceptionAdapter: Send + Sync {
    /// Describe what the character sees.
    async fn describe(
        &self,
        snapshot: &Snapshot,
        position: Option<Position>,
    ) -> Result<String, LlmError>;
}

/// Request knobs shared by the LLM adapters.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Sampling temperature for reflections.
    pub temperature: f32,
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Length the model is asked to stay under.
    pub max_utterance_chars: usize,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            timeout_ms: 20_000,
            max_utterance_chars: 400,
        }
    }
}

// ---------------------------------------------------------------------------
// LLM-backed generation
// ---------------------------------------------------------------------------

/// [`GenerationAdapter`] over an [`LlmClient`].
pub struct LlmGenerationAdapter {
    client: Arc<LlmClient>,
    settings: AdapterSettings,
}

impl LlmGenerationAdapter {
    /// Wrap a client.
    #[must_use]
    pub fn new(client: Arc<LlmClient>, settings: AdapterSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl GenerationAdapter for LlmGenerationAdapter {
    async fn reflect(&self, context: &str) -> Result<Reflection, LlmError> {
        let max_chars = self.settings.max_utterance_chars.to_string();
        let system = render_template(prompt::REFLECTION_SYSTEM, &[("max_chars", &max_chars)]);
        let request = LlmRequest::text(system, context)
            .with_json()
            .with_temperature(self.settings.temperature)
            .with_timeout(self.settings.timeout_ms);
        let response = self.client.generate(&request).await?;
        debug!(latency_ms = response.latency_ms, model = %response.model, "reflection generated");
        parse_reflection(&response.text)
    }

    async fn plan_target(
        &self,
        utterance: &str,
        snapshot: &Snapshot,
        position: Position,
        bounds: WorldBounds,
    ) -> Result<MovementTarget, LlmError> {
        let (x, y) = (format!("{:.0}", position.x), format!("{:.0}", position.y));
        let (w, h) = (format!("{:.0}", bounds.width), format!("{:.0}", bounds.height));
        let user = render_template(
            prompt::PLAN_TARGET_USER,
            &[("utterance", utterance), ("x", &x), ("y", &y), ("width", &w), ("height", &h)],
        );
        let request = LlmRequest::vision(prompt::PLAN_TARGET_SYSTEM, user, vec![snapshot.clone()])
            .with_json()
            .with_temperature(0.2)
            .with_timeout(self.settings.timeout_ms);
        let response = self.client.generate(&request).await?;
        parse_target(&response.text, bounds)
    }

    async fn evaluate(&self, utterance: &str) -> Result<Evaluation, LlmError> {
        let user = render_template(prompt::EVALUATE_USER, &[("utterance", utterance)]);
        let request = LlmRequest::text(prompt::EVALUATE_SYSTEM, user)
            .with_json()
            .with_temperature(0.0)
            .with_max_tokens(64)
            .with_timeout(self.settings.timeout_ms);
        let response = self.client.generate(&request).await?;
        parse_evaluation(&response.text)
    }
}

// ---------------------------------------------------------------------------
// LLM-backed perception
// ---------------------------------------------------------------------------

/// [`PerceptionAdapter`] over an [`LlmClient`]'s vision model.
pub struct LlmPerceptionAdapter {
    client: Arc<LlmClient>,
    timeout_ms: u64,
}

impl LlmPerceptionAdapter {
    /// Wrap a client.
    #[must_use]
    pub fn new(client: Arc<LlmClient>, timeout_ms: u64) -> Self {
        Self { client, timeout_ms }
    }
}

#[async_trait]
impl PerceptionAdapter for LlmPerceptionAdapter {
    async fn describe(
        &self,
        snapshot: &Snapshot,
        position: Option<Position>,
    ) -> Result<String, LlmError> {
        let where_ = position.map_or_else(
            || "somewhere in the world".to_string(),
            |p| format!("at x={:.0}, y={:.0}", p.x, p.y),
        );
        let user = render_template(prompt::DESCRIBE_USER, &[("position", &where_)]);
        let request = LlmRequest::vision(prompt::DESCRIBE_SYSTEM, user, vec![snapshot.clone()])
            .with_temperature(0.2)
            .with_timeout(self.timeout_ms);
        let response = self.client.generate(&request).await?;
        let text = response.text.trim();
        if text.is_empty() {
            return Err(LlmError::SchemaValidation("empty scene description".into()));
        }
        Ok(text.to_string())
    }
}

// ---------------------------------------------------------------------------
// Boundary validation
// ---------------------------------------------------------------------------

fn number_field(value: &Value, key: &str) -> Option<f64> {
    let n = match &value[key] {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn bool_field(value: &Value, key: &str) -> bool {
    match &value[key] {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
        _ => false,
    }
}

/// Validate a reflection answer.
///
/// # Errors
///
/// `ParseError` without a JSON object; `SchemaValidation` when the
/// utterance is missing or blank.
pub fn parse_reflection(text: &str) -> Result<Reflection, LlmError> {
    let value: Value = parse_json_object(text)?;
    let utterance = value["utterance"]
        .as_str()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| LlmError::SchemaValidation("missing or empty utterance".into()))?;
    Ok(Reflection {
        utterance: utterance.to_string(),
        wants_to_move: bool_field(&value, "wants_to_move"),
    })
}

/// Validate a movement answer and clamp it into `bounds`.
///
/// # Errors
///
/// `ParseError` without a JSON object; `SchemaValidation` when either
/// coordinate is missing or not a finite number.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_target(text: &str, bounds: WorldBounds) -> Result<MovementTarget, LlmError> {
    let value: Value = parse_json_object(text)?;
    let (Some(x), Some(y)) = (number_field(&value, "x"), number_field(&value, "y")) else {
        return Err(LlmError::SchemaValidation("target needs numeric x and y".into()));
    };
    let raw = Position::new(x as f32, y as f32);
    let position = bounds.clamp(raw);
    if position != raw {
        debug!(x, y, "movement target clamped into world bounds");
    }
    Ok(MovementTarget {
        position,
        reason: value["reason"].as_str().unwrap_or_default().trim().to_string(),
    })
}

/// Validate a scoring answer, clamping both scores into range.
///
/// # Errors
///
/// `ParseError` without a JSON object; `SchemaValidation` when a score is
/// missing or not a finite number.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_evaluation(text: &str) -> Result<Evaluation, LlmError> {
    let value: Value = parse_json_object(text)?;
    let (Some(importance), Some(valence)) =
        (number_field(&value, "importance"), number_field(&value, "valence"))
    else {
        return Err(LlmError::SchemaValidation("evaluation needs importance and valence".into()));
    };
    Ok(Evaluation {
        importance: importance.clamp(0.0, 10.0) as f32,
        valence: valence.clamp(-1.0, 1.0) as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflection_is_trimmed_and_defaults_movement() {
        let r = parse_reflection("Here you go: {\"utterance\": \"  What is virtue?  \"}")
            .expect("valid");
        assert_eq!(r.utterance, "What is virtue?");
        assert!(!r.wants_to_move);
    }

    #[test]
    fn reflection_accepts_string_flags() {
        let r = parse_reflection(r#"{"utterance":"Let me look.","wants_to_move":"yes"}"#)
            .expect("valid");
        assert!(r.wants_to_move);
    }

    #[test]
    fn blank_utterance_is_malformed() {
        let err = parse_reflection(r#"{"utterance":"   ","wants_to_move":true}"#)
            .expect_err("blank");
        assert!(err.is_malformed());
        assert!(parse_reflection("I simply speak without JSON").is_err());
    }

    #[test]
    fn target_is_clamped_into_bounds() {
        let bounds = WorldBounds::new(800.0, 600.0);
        let t = parse_target(r#"{"x": 1200, "y": -40, "reason": "the fountain"}"#, bounds)
            .expect("valid");
        assert_eq!(t.position, Position::new(800.0, 0.0));
        assert_eq!(t.reason, "the fountain");
    }

    #[test]
    fn target_accepts_numeric_strings_and_rejects_missing() {
        let bounds = WorldBounds::new(800.0, 600.0);
        let t = parse_target(r#"{"x": "100", "y": "50"}"#, bounds).expect("valid");
        assert_eq!(t.position, Position::new(100.0, 50.0));
        assert!(parse_target(r#"{"x": 100}"#, bounds).expect_err("no y").is_malformed());
    }

    #[test]
    fn evaluation_is_clamped() {
        let e = parse_evaluation(r#"{"importance": 42, "valence": -3.5}"#).expect("valid");
        assert!((e.importance - 10.0).abs() < f32::EPSILON);
        assert!((e.valence + 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn adapters_without_provider_are_unavailable() {
        let client = Arc::new(LlmClient::none());
        let generator = LlmGenerationAdapter::new(Arc::clone(&client), AdapterSettings::default());
        assert!(matches!(generator.reflect("ctx").await, Err(LlmError::Unavailable(_))));
        let eyes = LlmPerceptionAdapter::new(client, 1_000);
        assert!(matches!(
            eyes.describe(&Snapshot::png("AAAA"), None).await,
            Err(LlmError::Unavailable(_))
        ));
    }
}
