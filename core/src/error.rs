//! Error types for each protocol.

use thiserror::Error;

/// The kind of budget a [`TurnError::BudgetExceeded`] names.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    /// Token budget exhausted.
    Tokens,
    /// Cost budget exhausted.
    Cost,
    /// Wall-clock duration budget exhausted.
    Duration,
    /// Iteration count budget exhausted.
    Iterations,
}

/// Who triggered a cancellation.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    /// A human cancelled the run (e.g. pressed ESC).
    User,
    /// A timeout fired (subagent wrap-up/hard-cancel, per-tool timeout).
    Timeout,
    /// A parent agent's cancellation token propagated down.
    Parent,
}

/// Turn execution errors. One flat enum so callers can match on kind
/// without knowing which subsystem raised it — budget tracking, tool
/// execution, and provider calls all fail into the same shape.
/// Subsystem-local error enums convert into this at the point they
/// cross into loop control flow.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TurnError {
    /// A budget limit was hit at its hard threshold and could not be
    /// recovered by emergency compaction.
    #[error("budget exceeded: {kind:?} at {percent:.1}%")]
    BudgetExceeded {
        /// Which limit was exceeded.
        kind: BudgetKind,
        /// Usage as a percentage of the limit at the moment of failure.
        percent: f64,
    },

    /// The run was cancelled. Callers still receive whatever partial
    /// result the loop had accumulated — this error marks *why* the
    /// run stopped, not that nothing was produced.
    #[error("cancelled: {reason} (by {by:?})")]
    Cancelled {
        /// Human-readable cancellation reason.
        reason: String,
        /// Who/what triggered the cancellation.
        by: CancelledBy,
    },

    /// The policy engine forbade a tool call outright.
    #[error("policy denied tool {tool}: {reason}")]
    PolicyDenied {
        /// Name of the tool that was denied.
        tool: String,
        /// Reason given by the policy engine.
        reason: String,
    },

    /// A tool call failed. Per-call errors of this kind never escape
    /// the iteration in practice — the loop turns them into tool
    /// message content — but the type exists so a tool executor can
    /// return a typed error before that happens.
    #[error("tool error in {tool}: {cause}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Underlying cause.
        cause: String,
    },

    /// The LLM provider failed in a way resilience wrapping could not
    /// absorb (non-retryable, or retries exhausted).
    #[error("provider error: {0}")]
    Provider(String),

    /// A write claim on a path was held by another agent.
    #[error("claim conflict on {path}: held by {holder}")]
    ClaimConflict {
        /// The path whose claim conflicted.
        path: String,
        /// The agent id holding the conflicting claim.
        holder: String,
    },

    /// The model produced a future-intent response ("I'll now do X")
    /// with no tool call, and the nudge-and-retry cap was exhausted.
    #[error("incomplete action: model described work it never performed")]
    IncompleteAction,

    /// A saved checkpoint failed to deserialize or validate.
    #[error("invalid checkpoint: {0:?}")]
    CheckpointInvalid(Vec<String>),

    /// Context assembly failed before the model call.
    #[error("context assembly failed: {0}")]
    ContextAssembly(String),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Orchestration errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OrchError {
    /// The requested agent was not found.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// The requested workflow was not found.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Dispatching a turn failed.
    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    /// Signal delivery failed.
    #[error("signal delivery failed: {0}")]
    SignalFailed(String),

    /// A turn error propagated through orchestration.
    #[error("turn error: {0}")]
    TurnError(#[from] TurnError),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// State errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StateError {
    /// Key not found in the given scope.
    #[error("not found: {scope}/{key}")]
    NotFound {
        /// The scope that was searched.
        scope: String,
        /// The key that was not found.
        key: String,
    },

    /// A write operation failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Environment errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EnvError {
    /// Failed to provision the execution environment.
    #[error("provisioning failed: {0}")]
    ProvisionFailed(String),

    /// The isolation boundary was violated.
    #[error("isolation violation: {0}")]
    IsolationViolation(String),

    /// A resource limit was exceeded.
    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),

    /// A turn error propagated through the environment.
    #[error("turn error: {0}")]
    TurnError(#[from] TurnError),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Hook errors. These are logged but do NOT halt the turn
/// (use HookAction::Halt to halt).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook execution failed.
    #[error("hook failed: {0}")]
    Failed(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
