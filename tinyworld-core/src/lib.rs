//! # TinyWorld Core Library
//!
//! Game-agnostic two-tier memory engine for simulated characters.
//!
//! Every character gets a [`MemoryStore`] holding [`MemoryRecord`]s in two
//! tiers:
//!
//! - **Working**: small, churned set used as immediate context; bounded
//!   by capacity and trimmed by retention priority.
//! - **Long-term**: consolidated records that were important, emotional,
//!   insightful or frequently recalled; searched through an HNSW index once
//!   large.
//!
//! Records decay over wall-clock time. Persistence is pluggable through
//! [`MemoryBackend`] (in-memory or SQLite).

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod consolidation;
pub mod decay;
pub mod embedding;
pub mod error;
pub mod eviction;
pub mod index;
pub mod metrics;
pub mod store;
pub mod types;

pub use backend::{InMemoryBackend, MemoryBackend, SqliteBackend};
pub use config::TinyWorldConfig;
pub use decay::DecayReport;
pub use embedding::EmbeddingProvider;
pub use error::MemoryError;
pub use store::{Context, MemoryStore};
pub use types::*;
