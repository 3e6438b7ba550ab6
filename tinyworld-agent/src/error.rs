//! Runtime error types.
//!
//! Only registration and startup can fail. A running cycle never returns
//! an error: step failures become [`crate::state::StepFault`]s and refused
//! triggers become [`crate::scheduler::TriggerOutcome::Skipped`].

use thiserror::Error;
use tinyworld_core::CharacterId;
use tinyworld_core::MemoryError;
use tinyworld_llm::LlmError;

/// Errors from the character runtime.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No character with this id is registered.
    #[error("unknown character: {0}")]
    UnknownCharacter(CharacterId),

    /// A character with this id is already registered.
    #[error("character already registered: {0}")]
    DuplicateCharacter(CharacterId),

    /// Memory store setup failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// LLM client setup failed.
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AgentError>;
