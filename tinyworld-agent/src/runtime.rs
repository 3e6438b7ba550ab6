//! Wiring from configuration to running parts.

use std::sync::Arc;

use tinyworld_core::config::TinyWorldConfig;
use tinyworld_core::embedding::provider_from_config;
use tinyworld_core::{InMemoryBackend, MemoryBackend, MemoryStore, SqliteBackend};
use tinyworld_llm::{
    AdapterSettings, LlmClient, LlmGenerationAdapter, LlmPerceptionAdapter, LlmProvider,
};
use tracing::info;

use crate::error::{AgentError, Result};
use crate::profile::CharacterProfile;
use crate::workflow::{Workflow, WorkflowSettings};

/// Open the configured persistence backend (`sqlite` or `memory`).
///
/// # Errors
///
/// Fails for an unknown backend name or an unopenable database.
pub fn backend_from_config(config: &TinyWorldConfig) -> Result<Arc<dyn MemoryBackend>> {
    let persistence = &config.persistence;
    match persistence.backend.as_str() {
        "sqlite" => {
            let backend = SqliteBackend::open(&persistence.path, persistence)?;
            info!(path = %persistence.path, "sqlite memory backend opened");
            Ok(Arc::new(backend))
        }
        "memory" => Ok(Arc::new(InMemoryBackend::new())),
        other => Err(AgentError::Memory(tinyworld_core::MemoryError::Config(format!(
            "unknown persistence backend: {other}"
        )))),
    }
}

/// Build the LLM client described by `[llm]`.
///
/// # Errors
///
/// Fails for an unknown provider or a missing API key.
pub fn llm_client_from_config(config: &TinyWorldConfig) -> Result<Arc<LlmClient>> {
    let llm = &config.llm;
    let provider = LlmProvider::from_name(&llm.provider, &llm.base_url, llm.api_key.as_deref())?;
    Ok(Arc::new(LlmClient::new(
        provider,
        llm.model.clone(),
        llm.vision_model.clone(),
        llm.max_retries,
    )))
}

/// Workflow for the configured character over `backend`, with LLM
/// generation and perception.
///
/// # Errors
///
/// Fails if the memory store or the LLM client cannot be set up.
pub fn workflow_from_config(
    config: &TinyWorldConfig,
    backend: Arc<dyn MemoryBackend>,
) -> Result<Workflow> {
    let profile = CharacterProfile::from(&config.character);
    let store = MemoryStore::open(
        profile.id.clone(),
        backend,
        provider_from_config(&config.retrieval)?,
        config.memory.clone(),
        config.retrieval.clone(),
    )?;
    let client = llm_client_from_config(config)?;
    let generator = LlmGenerationAdapter::new(
        Arc::clone(&client),
        AdapterSettings {
            temperature: config.llm.temperature,
            timeout_ms: config.llm.request_timeout_ms,
            max_utterance_chars: config.workflow.max_utterance_chars,
        },
    );
    let perception = LlmPerceptionAdapter::new(client, config.llm.request_timeout_ms);
    Ok(Workflow::new(
        profile,
        Arc::new(store),
        Arc::new(generator),
        WorkflowSettings::from_config(config),
    )
    .with_perception(Arc::new(perception)))
}
