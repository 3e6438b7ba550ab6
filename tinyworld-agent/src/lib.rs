//! # tinyworld-agent: Character Runtime for TinyWorld
//!
//! Drives simulated characters through repeating cycles of perception,
//! recall, generation, self-evaluation and persistence.
//!
//! ```text
//! Trigger ──▶ CycleScheduler ──▶ Workflow ──▶ MemoryStore (tinyworld-core)
//!   (timer,     (single-flight,     │
//!    snapshot,   merge → time        └──▶ Generation / Perception
//!    manual)     → release)               adapters (tinyworld-llm)
//!                  │
//!                  ▼
//!           StatePublisher ──▶ clients
//! ```
//!
//! ## Modules
//!
//! - `events`: inbound triggers and the outbound `agent_update` event
//! - `profile`: character identity and context composition
//! - `state`: per-cycle state, per-character state, step faults
//! - `heuristics`: keyword scoring and fallback lines
//! - `workflow`: the OBSERVE → … → FINALIZE decision sequence
//! - `scheduler`: single-flight admission, ordered state writes, timer loop
//! - `publisher`: broadcast and log publishers
//! - `runtime`: wiring from `tinyworld.toml`

#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod events;
pub mod heuristics;
pub mod profile;
pub mod publisher;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod workflow;

pub use error::AgentError;
pub use events::{OutboundEvent, Trigger, TriggerSource};
pub use profile::CharacterProfile;
pub use publisher::{BroadcastPublisher, LogPublisher, StatePublisher};
pub use scheduler::{CycleScheduler, SchedulerSettings, SkipReason, TriggerOutcome};
pub use state::{CharacterState, CycleState, StepFault};
pub use workflow::{CycleReport, Step, Workflow, WorkflowSettings};
