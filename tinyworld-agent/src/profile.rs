//! Character identity and context composition.

use serde::{Deserialize, Serialize};
use tinyworld_core::CharacterId;
use tinyworld_core::config::CharacterConfig;
use tinyworld_llm::prompt::{self, render_template};

/// Placeholder used when RECALL found nothing.
pub const NO_MEMORIES: &str = "No memories yet. This is your first reflection.";

/// Placeholder used when nothing was perceived.
pub const NO_PERCEPTION: &str = "nothing in particular yet";

/// Who a character is. Immutable for the lifetime of its workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub id: CharacterId,
    pub name: String,
    pub personality: String,
    pub mission: String,
    pub core_traits: Vec<String>,
    pub speaking_style: String,
    pub initial_beliefs: Vec<String>,
}

impl From<&CharacterConfig> for CharacterProfile {
    fn from(config: &CharacterConfig) -> Self {
        Self {
            id: CharacterId::new(config.id.clone()),
            name: config.name.clone(),
            personality: config.personality.clone(),
            mission: config.mission.clone(),
            core_traits: config.core_traits.clone(),
            speaking_style: config.speaking_style.clone(),
            initial_beliefs: config.initial_beliefs.clone(),
        }
    }
}

impl CharacterProfile {
    /// The default awakening philosopher.
    #[must_use]
    pub fn socrates() -> Self {
        Self::from(&CharacterConfig::default())
    }

    /// Compose the GENERATE context.
    ///
    /// `memories` are recalled excerpts, most relevant first. `mission`
    /// overrides the profile's own mission when the trigger supplies one.
    #[must_use]
    pub fn compose_context(
        &self,
        perception: Option<&str>,
        memories: &[String],
        mission: Option<&str>,
    ) -> String {
        let recent = if memories.is_empty() {
            NO_MEMORIES.to_string()
        } else {
            memories
                .iter()
                .enumerate()
                .map(|(i, m)| format!("{}. \"{m}\"", i + 1))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let traits = self.core_traits.join(", ");
        let beliefs = self.initial_beliefs.join(" ");
        render_template(
            prompt::CHARACTER_CONTEXT,
            &[
                ("character_name", &self.name),
                ("personality", &self.personality),
                ("mission", mission.unwrap_or(&self.mission)),
                ("core_traits", &traits),
                ("speaking_style", &self.speaking_style),
                ("initial_beliefs", &beliefs),
                ("perception", perception.unwrap_or(NO_PERCEPTION)),
                ("recent_memories", &recent),
            ],
        )
    }
}
