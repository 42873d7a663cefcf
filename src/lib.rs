#![deny(missing_docs)]
//! # agentcore — umbrella crate
//!
//! Single import surface for the coding-agent execution core. Re-exports
//! protocol traits and the reference implementations behind feature flags,
//! plus a `prelude` for the happy path.

#[cfg(feature = "context")]
pub use core_context;
#[cfg(feature = "env-local")]
pub use core_env_local;
#[cfg(feature = "hooks")]
pub use core_hooks;
#[cfg(feature = "loop")]
pub use core_loop;
#[cfg(feature = "orch-local")]
pub use core_orch_local;
#[cfg(feature = "plan")]
pub use core_plan;
#[cfg(feature = "state-memory")]
pub use core_state_memory;
#[cfg(feature = "subagent")]
pub use core_subagent;
#[cfg(feature = "substrate")]
pub use core_substrate;
#[cfg(feature = "tool")]
pub use core_tool;
pub use agentcore_proto;

/// Happy-path imports for composing an execution core.
pub mod prelude {
    pub use agentcore_proto::{
        AgentId, Content, ContentBlock, Effect, Environment, ExitReason, Hook, HookAction,
        HookContext, HookPoint, Scope, SessionId, StateReader, StateStore, Turn, TurnConfig,
        TurnInput, TurnOutput, WorkflowId,
    };

    #[cfg(feature = "hooks")]
    pub use core_hooks::HookRegistry;

    #[cfg(feature = "tool")]
    pub use core_tool::{ToolDyn, ToolError, ToolRegistry};

    #[cfg(feature = "context")]
    pub use core_context::provider::{Provider, ProviderError};

    #[cfg(feature = "loop")]
    pub use core_loop::{ExecutionLoop, LoopConfig};

    #[cfg(feature = "substrate")]
    pub use core_substrate::{Blackboard, BudgetPool, FileCache, TraceSink};

    #[cfg(feature = "subagent")]
    pub use core_subagent::{SpawnConfig, SpawnConstraints, Spawner};

    #[cfg(feature = "plan")]
    pub use core_plan::PlanManager;

    #[cfg(feature = "state-memory")]
    pub use core_state_memory::MemoryStore;

    #[cfg(feature = "orch-local")]
    pub use core_orch_local::LocalOrch;
}
