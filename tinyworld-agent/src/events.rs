//! Inbound triggers and outbound state events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tinyworld_core::CharacterId;
use tinyworld_llm::{Position, Snapshot};

/// What caused a cycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Wall-clock timer tick.
    Timer,
    /// A snapshot arrived from the presentation layer.
    Snapshot,
    /// Explicit operator request; bypasses the minimum interval.
    Manual,
}

/// A request to run one cycle for one character.
#[derive(Debug, Clone)]
pub struct Trigger {
    /// Whose cycle.
    pub character: CharacterId,
    /// Why now.
    pub source: TriggerSource,
    /// Visual snapshot, for the vision-driven variant.
    pub snapshot: Option<Snapshot>,
    /// Where the character currently stands.
    pub position: Option<Position>,
    /// Scene description supplied by the caller.
    pub perception: Option<String>,
    /// Mission text overriding the profile's.
    pub mission: Option<String>,
}

impl Trigger {
    fn new(character: CharacterId, source: TriggerSource) -> Self {
        Self {
            character,
            source,
            snapshot: None,
            position: None,
            perception: None,
            mission: None,
        }
    }

    /// A timer tick.
    #[must_use]
    pub fn timer(character: CharacterId) -> Self {
        Self::new(character, TriggerSource::Timer)
    }

    /// A snapshot from the client, with the character's current position.
    #[must_use]
    pub fn snapshot(character: CharacterId, snapshot: Snapshot, position: Position) -> Self {
        Self {
            snapshot: Some(snapshot),
            position: Some(position),
            ..Self::new(character, TriggerSource::Snapshot)
        }
    }

    /// A manual override.
    #[must_use]
    pub fn manual(character: CharacterId) -> Self {
        Self::new(character, TriggerSource::Manual)
    }

    /// Attach a scene description.
    #[must_use]
    pub fn with_perception(mut self, perception: impl Into<String>) -> Self {
        self.perception = Some(perception.into());
        self
    }

    /// Attach mission text.
    #[must_use]
    pub fn with_mission(mut self, mission: impl Into<String>) -> Self {
        self.mission = Some(mission.into());
        self
    }

    /// Attach the current position without a snapshot.
    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Whether the minimum inter-cycle interval is waived.
    #[must_use]
    pub fn bypasses_interval(&self) -> bool {
        self.source == TriggerSource::Manual
    }
}

/// Event pushed to clients after each completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// The character spoke (and maybe chose where to walk).
    AgentUpdate(AgentUpdate),
}

/// Payload of [`OutboundEvent::AgentUpdate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentUpdate {
    pub character_id: CharacterId,
    pub character_name: String,
    pub utterance: String,
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    /// Present only when a target was planned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wants_to_move: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl OutboundEvent {
    /// Character this event is about.
    #[must_use]
    pub fn character(&self) -> &CharacterId {
        match self {
            Self::AgentUpdate(update) => &update.character_id,
        }
    }

    /// JSON text for the wire.
    ///
    /// # Errors
    ///
    /// Only if serialization fails, which these plain types never do.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
