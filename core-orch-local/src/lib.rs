#![deny(missing_docs)]
//! In-process implementation of the `Orchestrator` protocol.
//!
//! Dispatches to registered agents via `HashMap<AgentId, Arc<dyn Turn>>`.
//! Concurrent dispatch uses `tokio::spawn` under a settle-all discipline —
//! one agent's failure never cancels its siblings, which is exactly the
//! guarantee parallel subagent spawning (and plan-mode batch execution)
//! is built on. No durability — turns that fail are not retried and no
//! workflow state is persisted; signal and query are no-ops.

use agentcore_proto::effect::SignalPayload;
use agentcore_proto::error::OrchError;
use agentcore_proto::id::{AgentId, WorkflowId};
use agentcore_proto::orchestrator::{Orchestrator, QueryPayload};
use agentcore_proto::turn::{Turn, TurnInput, TurnOutput};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// In-process orchestrator that dispatches to registered agents.
///
/// Uses `Arc<dyn Turn>` for true concurrent dispatch via `tokio::spawn`.
/// No durability, no workflow tracking. Suitable for development,
/// testing, and single-process deployments, and as the execution
/// backend for parallel subagent spawn.
pub struct LocalOrch {
    agents: HashMap<String, Arc<dyn Turn>>,
}

impl LocalOrch {
    /// Create a new empty orchestrator.
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register an agent with the orchestrator.
    pub fn register(&mut self, id: AgentId, turn: Arc<dyn Turn>) {
        self.agents.insert(id.to_string(), turn);
    }

    /// Number of agents currently registered.
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }
}

impl Default for LocalOrch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Orchestrator for LocalOrch {
    async fn dispatch(
        &self,
        agent: &AgentId,
        input: TurnInput,
    ) -> Result<TurnOutput, OrchError> {
        let turn = self
            .agents
            .get(agent.as_str())
            .ok_or_else(|| OrchError::AgentNotFound(agent.to_string()))?;
        turn.execute(input).await.map_err(OrchError::TurnError)
    }

    async fn dispatch_many(
        &self,
        tasks: Vec<(AgentId, TurnInput)>,
    ) -> Vec<Result<TurnOutput, OrchError>> {
        let batch_size = tasks.len();
        tracing::debug!(batch_size, "dispatching parallel batch");
        let mut handles = Vec::with_capacity(tasks.len());

        for (agent_id, input) in tasks {
            match self.agents.get(agent_id.as_str()) {
                Some(turn) => {
                    let turn = Arc::clone(turn);
                    handles.push(tokio::spawn(async move {
                        turn.execute(input).await.map_err(OrchError::TurnError)
                    }));
                }
                None => {
                    let name = agent_id.to_string();
                    handles.push(tokio::spawn(async move { Err(OrchError::AgentNotFound(name)) }));
                }
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut failures = 0usize;
        for handle in handles {
            match handle.await {
                Ok(result) => {
                    if result.is_err() {
                        failures += 1;
                    }
                    results.push(result);
                }
                Err(e) => {
                    failures += 1;
                    results.push(Err(OrchError::DispatchFailed(e.to_string())));
                }
            }
        }

        if failures > 0 {
            tracing::warn!(batch_size, failures, "some tasks in batch failed");
        }

        results
    }

    async fn signal(
        &self,
        _target: &WorkflowId,
        _signal: SignalPayload,
    ) -> Result<(), OrchError> {
        // LocalOrch doesn't track running workflows — accept and discard.
        Ok(())
    }

    async fn query(
        &self,
        _target: &WorkflowId,
        _query: QueryPayload,
    ) -> Result<serde_json::Value, OrchError> {
        // LocalOrch doesn't track running workflows — return null.
        Ok(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore_proto::content::Content;
    use agentcore_proto::error::TurnError;
    use agentcore_proto::turn::{ExitReason, TriggerType};

    struct EchoTurnLocal;

    #[async_trait]
    impl Turn for EchoTurnLocal {
        async fn execute(&self, input: TurnInput) -> Result<TurnOutput, TurnError> {
            Ok(TurnOutput::new(input.message, ExitReason::Complete))
        }
    }

    #[tokio::test]
    async fn agent_count_tracks_registrations() {
        let mut orch = LocalOrch::new();
        assert_eq!(orch.agent_count(), 0);
        orch.register(AgentId::new("a"), Arc::new(EchoTurnLocal));
        assert_eq!(orch.agent_count(), 1);
    }

    #[tokio::test]
    async fn dispatch_unknown_agent_fails() {
        let orch = LocalOrch::new();
        let input = TurnInput::new(Content::text("hi"), TriggerType::User);
        let result = orch.dispatch(&AgentId::new("missing"), input).await;
        assert!(matches!(result, Err(OrchError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn dispatch_many_settles_all_even_with_one_missing() {
        let mut orch = LocalOrch::new();
        orch.register(AgentId::new("a"), Arc::new(EchoTurnLocal));

        let tasks = vec![
            (AgentId::new("a"), TurnInput::new(Content::text("1"), TriggerType::User)),
            (AgentId::new("missing"), TurnInput::new(Content::text("2"), TriggerType::User)),
            (AgentId::new("a"), TurnInput::new(Content::text("3"), TriggerType::User)),
        ];

        let results = orch.dispatch_many(tasks).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(OrchError::AgentNotFound(_))));
        assert!(results[2].is_ok());
    }
}
