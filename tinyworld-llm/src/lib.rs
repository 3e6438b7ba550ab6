//! # tinyworld-llm: Language-Model Boundary for TinyWorld
//!
//! Everything the character runtime asks of a language model goes through
//! this crate:
//!   - **Generation** ([`GenerationAdapter`]): reflections, movement
//!     targets and memory scores.
//!   - **Perception** ([`PerceptionAdapter`]): a scene description from an
//!     opaque snapshot.
//!
//! Backends:
//!   - **Ollama** (local, recommended default, `llava` for vision)
//!   - **OpenAI-compatible API**
//!   - **None**: every call fails with `Unavailable` and the workflow
//!     falls back to fixed values.
//!
//! Model output is never trusted: the first JSON object is extracted,
//! numbers are clamped and missing fields defaulted before anything
//! reaches the workflow.

#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod client;
pub mod error;
pub mod prompt;
pub mod types;

pub use adapter::{
    AdapterSettings, GenerationAdapter, LlmGenerationAdapter, LlmPerceptionAdapter,
    PerceptionAdapter,
};
pub use client::{LlmClient, LlmProvider};
pub use error::LlmError;
pub use types::{
    Evaluation, LlmRequest, LlmResponse, ModelRole, MovementTarget, Position, Reflection,
    Snapshot, WorldBounds,
};
