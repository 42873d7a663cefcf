//! How turns from different agents compose, including the spawn of
//! subagents and fan-out/fan-in across them.

use crate::{
    error::OrchError,
    id::*,
    turn::{TurnInput, TurnOutput},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Dispatches turns to agents and composes the results, surviving
/// individual failures along the way.
///
/// An in-process implementation runs dispatch as a tokio task with no
/// durability; a workflow-backed one replays from history after a
/// crash. Calling code never knows which is behind the trait —
/// `dispatch()` might be a function call or a network hop. That's the
/// point: the trait is transport-agnostic.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Dispatch a single turn invocation to an agent. May execute locally or
    /// remotely. May be durable or fire-and-forget. The trait doesn't
    /// specify — the implementation decides.
    async fn dispatch(&self, agent: &AgentId, input: TurnInput) -> Result<TurnOutput, OrchError>;

    /// Dispatch multiple turn invocations in parallel. The implementation decides
    /// whether this is tokio::spawn, durable child workflows, parallel
    /// HTTP requests, or something else.
    ///
    /// Returns results in the same order as the input tasks.
    /// Individual tasks may fail independently and do not cancel their
    /// siblings — callers get back one result per task, success or
    /// error, and decide what to do with the mix. Subagent spawning
    /// relies on this settle-all behavior to collect partial progress
    /// from a batch even when some children error out.
    async fn dispatch_many(
        &self,
        tasks: Vec<(AgentId, TurnInput)>,
    ) -> Vec<Result<TurnOutput, OrchError>>;

    /// Fire-and-forget signal to a running workflow.
    /// Used for: inter-agent messaging, user feedback injection,
    /// budget adjustments, cancellation.
    ///
    /// Returns Ok(()) when the signal is accepted (not when it's
    /// processed — that's async by nature).
    ///
    /// Uses [`crate::effect::SignalPayload`] — the same type operators use to
    /// declare signals as effects. One type, two sides of the boundary.
    async fn signal(
        &self,
        target: &WorkflowId,
        signal: crate::effect::SignalPayload,
    ) -> Result<(), OrchError>;

    /// Read-only query of a running workflow's state.
    /// Used for: dashboards, status checks, budget queries.
    ///
    /// Returns a JSON value — the schema depends on the workflow.
    async fn query(
        &self,
        target: &WorkflowId,
        query: QueryPayload,
    ) -> Result<serde_json::Value, OrchError>;
}

/// Payload for querying a running workflow.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPayload {
    /// The type of query to execute.
    pub query_type: String,
    /// Query parameters.
    pub params: serde_json::Value,
}

impl QueryPayload {
    /// Create a new query payload.
    pub fn new(query_type: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            query_type: query_type.into(),
            params,
        }
    }
}
