//! # agentcore-proto — protocol traits for a coding-agent execution core
//!
//! A coding agent loop, a subagent spawned to chase one task, and the
//! tool sandbox it runs in all look different on the inside but need to
//! talk to each other the same way every time. This crate pins down that
//! shared vocabulary as four protocol boundaries plus two cross-cutting
//! interfaces, independent of any one runtime.
//!
//! ## The Protocols
//!
//! | Protocol | Trait | What it does |
//! |----------|-------|-------------|
//! | Turn | [`Turn`] | Run one agent cycle: message in, response + effects out |
//! | Orchestration | [`Orchestrator`] | Dispatch turns, fan out subagents, settle results |
//! | State | [`StateStore`] | Persist conversation/session data across turns |
//! | Environment | [`Environment`] | Isolation, credentials, resource handles |
//!
//! ## The Interfaces
//!
//! | Interface | Types | What it does |
//! |-----------|-------|-------------|
//! | Hooks | [`Hook`], [`HookPoint`], [`HookAction`] | Observe and intervene mid-turn |
//! | Lifecycle | [`BudgetEvent`], [`CompactionEvent`] | Budget and context events other layers react to |
//!
//! ## Design Principle
//!
//! Every protocol trait is operation-defined, not mechanism-defined.
//! [`Turn::execute`] means "run this agent through one cycle" — not
//! "make an API call" or "spawn a subprocess." A turn backed by a
//! single raw completion call and a turn that runs its own tool loop
//! with context compaction both satisfy the same trait.
//!
//! ## Dependency Notes
//!
//! This crate depends on `serde_json::Value` for extension fields
//! (metadata, tool inputs, custom payloads) rather than a generic
//! `T: Serialize`, which would complicate trait object safety for
//! little practical benefit. JSON already has to cross the wire to
//! model providers and tool processes, so it pays for itself here too.
//!
//! ## Future: Native Async Traits
//!
//! Protocol traits currently use `async-trait` (heap-allocated futures).
//! When Rust stabilizes `async fn in dyn Trait` with `Send` bounds,
//! these traits will migrate to native async. This will be a breaking
//! change in a minor version bump before v1.0.

#![deny(missing_docs)]

pub mod content;
pub mod duration;
pub mod effect;
pub mod environment;
pub mod error;
pub mod hook;
pub mod id;
pub mod lifecycle;
pub mod orchestrator;
pub mod state;
pub mod turn;

#[cfg(feature = "test-utils")]
pub mod test_utils;

// Re-exports for convenience
pub use content::{Content, ContentBlock};
pub use duration::DurationMs;
pub use effect::{Effect, Scope, SignalPayload};
pub use environment::{Environment, EnvironmentSpec};
pub use error::{EnvError, HookError, OrchError, StateError, TurnError};
pub use hook::{Hook, HookAction, HookContext, HookPoint};
pub use id::{AgentId, ScopeId, SessionId, WorkflowId};
pub use lifecycle::{BudgetEvent, CompactionEvent, ObservableEvent};
pub use orchestrator::{Orchestrator, QueryPayload};
pub use state::{SearchResult, StateReader, StateStore};
pub use turn::{
    ExitReason, ToolCallRecord, Turn, TurnConfig, TurnInput, TurnMetadata, TurnOutput,
};
