//! Core types for LLM requests, responses and the structured answers the
//! adapters return.

use serde::{Deserialize, Serialize};

/// Which configured model serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Text-only reasoning (reflection, evaluation).
    Text,
    /// Image-capable model (perception, movement planning).
    Vision,
}

/// An opaque image captured from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Base64-encoded image bytes.
    pub data_base64: String,
}

impl Snapshot {
    /// A PNG snapshot from already base64-encoded bytes.
    #[must_use]
    pub fn png(data_base64: impl Into<String>) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            data_base64: data_base64.into(),
        }
    }

    /// `data:` URL form used by OpenAI-compatible APIs.
    #[must_use]
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data_base64)
    }
}

/// A point in world pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f32,
    /// Vertical coordinate.
    pub y: f32,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// World extent; valid positions lie in `[0, width] × [0, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
}

impl WorldBounds {
    /// Create bounds.
    #[must_use]
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Clamp `p` into the world.
    #[must_use]
    pub fn clamp(self, p: Position) -> Position {
        Position {
            x: p.x.clamp(0.0, self.width.max(0.0)),
            y: p.y.clamp(0.0, self.height.max(0.0)),
        }
    }
}

/// A request to the LLM.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// System prompt (persona, rules, output format).
    pub system: String,
    /// User prompt (context, instructions).
    pub user: String,
    /// Which model serves the request.
    pub role: ModelRole,
    /// Images attached to the user prompt.
    pub images: Vec<Snapshot>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,
    /// Ask the provider to constrain output to JSON.
    pub json_mode: bool,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl LlmRequest {
    /// A text-model request.
    #[must_use]
    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            role: ModelRole::Text,
            images: Vec::new(),
            max_tokens: 256,
            temperature: 0.7,
            json_mode: false,
            timeout_ms: 20_000,
        }
    }

    /// A vision-model request carrying `images`.
    #[must_use]
    pub fn vision(
        system: impl Into<String>,
        user: impl Into<String>,
        images: Vec<Snapshot>,
    ) -> Self {
        Self {
            role: ModelRole::Vision,
            images,
            ..Self::text(system, user)
        }
    }

    /// Constrain output to JSON.
    #[must_use]
    pub fn with_json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the token limit.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A response from the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,
    /// How many tokens were generated.
    pub tokens_generated: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Which model was used.
    pub model: String,
}

// ---------------------------------------------------------------------------
// Structured answers (validated at the adapter boundary)
// ---------------------------------------------------------------------------

/// What the character says this cycle and whether it wants to move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    /// The spoken line; never empty.
    pub utterance: String,
    /// Whether the character asked to walk somewhere.
    #[serde(default)]
    pub wants_to_move: bool,
}

/// A movement target inside the world, with the model's reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementTarget {
    /// Where to go; already inside world bounds.
    pub position: Position,
    /// Why the character chose it.
    pub reason: String,
}

/// Importance and valence of an utterance, already clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// In `[0, 10]`.
    pub importance: f32,
    /// In `[-1, 1]`.
    pub valence: f32,
}
