//! Policy-gated, claim-aware tool execution with read-only batching.

use crate::claims::{ClaimStore, DEFAULT_CLAIM_TTL};
use crate::policy::{AllowAll, PolicyDecision, PolicyEngine};
use crate::safety::{SafetyDecision, SafetyGate};
use crate::{is_parallelizable, is_write, ToolError, ToolKind, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;

/// One proposed call to route through the executor.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Identifier correlating this call to its originating model request.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool input arguments.
    pub input: serde_json::Value,
}

/// Result of routing a single [`ToolCall`] through the executor.
pub struct ToolOutcome {
    /// The call's id, echoed back for correlation.
    pub id: String,
    /// The tool's output, or the error that stopped execution.
    pub result: Result<serde_json::Value, ToolError>,
}

/// Result of executing a batch of calls, partitioned by how they ran.
pub struct BatchOutcome {
    /// Outcomes in the same order as the input calls.
    pub outcomes: Vec<ToolOutcome>,
}

/// Default per-tool execution timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Wraps a [`ToolRegistry`] with policy evaluation, safety validation, file
/// claims, and parallel batching of adjacent read-only calls.
pub struct ToolExecutor {
    registry: ToolRegistry,
    policy: Arc<dyn PolicyEngine>,
    safety: Option<Arc<dyn SafetyGate>>,
    claims: Option<Arc<dyn ClaimStore>>,
    claim_ttl: Duration,
    timeout: Duration,
}

impl ToolExecutor {
    /// Build an executor around `registry` that allows every call and
    /// performs no safety or claim checks. Use the builder methods to add
    /// gates.
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            policy: Arc::new(AllowAll),
            safety: None,
            claims: None,
            claim_ttl: DEFAULT_CLAIM_TTL,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Set the policy engine.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn PolicyEngine>) -> Self {
        self.policy = policy;
        self
    }

    /// Set the safety gate.
    #[must_use]
    pub fn with_safety(mut self, safety: Arc<dyn SafetyGate>) -> Self {
        self.safety = Some(safety);
        self
    }

    /// Set the file-claim store and its TTL for write/destructive calls.
    #[must_use]
    pub fn with_claims(mut self, claims: Arc<dyn ClaimStore>, ttl: Duration) -> Self {
        self.claims = Some(claims);
        self.claim_ttl = ttl;
        self
    }

    /// Set the per-tool execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn target_path(args: &serde_json::Value) -> Option<String> {
        args.get("path")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Run a single call through the full gate pipeline: policy, safety,
    /// claim, timeout-wrapped execution, claim release.
    pub async fn execute_one(
        &self,
        call: &ToolCall,
        holder: &str,
        prior_calls: &[String],
    ) -> Result<serde_json::Value, ToolError> {
        let Some(tool) = self.registry.get(&call.name) else {
            return Err(ToolError::NotFound(call.name.clone()));
        };
        let kind = tool.kind();

        match self.policy.evaluate(&call.name, &call.input, prior_calls).await {
            PolicyDecision::Allow => {}
            PolicyDecision::Prompt { reason } => {
                // Approval/escalation is owned by the caller (the loop
                // holds the human-in-loop channel); the executor treats an
                // un-escalated Prompt as forbidden rather than guessing.
                return Err(ToolError::PolicyForbidden(format!(
                    "requires approval: {reason}"
                )));
            }
            PolicyDecision::Forbidden { reason } => {
                return Err(ToolError::PolicyForbidden(reason));
            }
        }

        if let Some(safety) = &self.safety {
            if let SafetyDecision::Rejected(reason) = safety.check(&call.name, &call.input) {
                return Err(ToolError::SafetyRejected(reason));
            }
        }

        let claimed_path = if is_write(kind) {
            Self::target_path(&call.input)
        } else {
            None
        };

        if let (Some(path), Some(claims)) = (&claimed_path, &self.claims) {
            claims
                .try_claim(path, holder, self.claim_ttl)
                .await
                .map_err(|conflict| ToolError::PathClaimed {
                    path: conflict.path,
                    holder: conflict.holder,
                })?;
        }

        let outcome = tokio::time::timeout(self.timeout, tool.call(call.input.clone()))
            .await
            .map_err(|_| ToolError::Timeout(self.timeout))
            .and_then(|r| r);

        if outcome.is_ok() {
            if let (Some(path), Some(claims)) = (&claimed_path, &self.claims) {
                claims.release(path, holder).await;
            }
        }

        if let Err(e) = &outcome {
            tracing::debug!(tool = %call.name, error = %e, "tool call failed");
        }

        outcome
    }

    /// Execute a sequence of calls, running adjacent read-only runs
    /// concurrently and serializing write/destructive calls (and the
    /// boundaries around them) one at a time.
    pub async fn execute_batch(&self, calls: Vec<ToolCall>, holder: &str) -> BatchOutcome {
        let mut outcomes: Vec<Option<ToolOutcome>> = (0..calls.len()).map(|_| None).collect();
        let mut prior_calls: Vec<String> = Vec::new();
        let mut i = 0;

        while i < calls.len() {
            let kind = self
                .registry
                .get(&calls[i].name)
                .map(|t| t.kind())
                .unwrap_or(ToolKind::Write);

            if is_parallelizable(kind) {
                let mut run_end = i + 1;
                while run_end < calls.len()
                    && self
                        .registry
                        .get(&calls[run_end].name)
                        .map(|t| is_parallelizable(t.kind()))
                        .unwrap_or(false)
                {
                    run_end += 1;
                }

                let run = &calls[i..run_end];
                let results = futures_util::future::join_all(
                    run.iter()
                        .map(|call| self.execute_one(call, holder, &prior_calls)),
                )
                .await;

                for (offset, result) in results.into_iter().enumerate() {
                    let idx = i + offset;
                    prior_calls.push(calls[idx].name.clone());
                    outcomes[idx] = Some(ToolOutcome {
                        id: calls[idx].id.clone(),
                        result,
                    });
                }
                i = run_end;
            } else {
                let result = self.execute_one(&calls[i], holder, &prior_calls).await;
                prior_calls.push(calls[i].name.clone());
                outcomes[i] = Some(ToolOutcome {
                    id: calls[i].id.clone(),
                    result,
                });
                i += 1;
            }
        }

        BatchOutcome {
            outcomes: outcomes.into_iter().map(|o| o.expect("every index filled")).collect(),
        }
    }

    /// Borrow the underlying registry (tool schema listing, etc.).
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::InMemoryClaimStore;
    use crate::policy::FnPolicy;
    use crate::safety::AllowList;
    use crate::{ToolDyn, ToolError as TErr};
    use serde_json::json;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ReadTool;
    impl ToolDyn for ReadTool {
        fn name(&self) -> &str {
            "read_file"
        }
        fn description(&self) -> &str {
            "reads a file"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({})
        }
        fn kind(&self) -> ToolKind {
            ToolKind::ReadOnly
        }
        fn call(
            &self,
            input: serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, TErr>> + Send + '_>> {
            Box::pin(async move { Ok(json!({"read": input})) })
        }
    }

    struct WriteTool;
    impl ToolDyn for WriteTool {
        fn name(&self) -> &str {
            "write_file"
        }
        fn description(&self) -> &str {
            "writes a file"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({})
        }
        fn kind(&self) -> ToolKind {
            ToolKind::Write
        }
        fn call(
            &self,
            input: serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, TErr>> + Send + '_>> {
            Box::pin(async move { Ok(json!({"wrote": input})) })
        }
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(ReadTool));
        reg.register(Arc::new(WriteTool));
        reg
    }

    #[tokio::test]
    async fn unknown_tool_fails_fast() {
        let executor = ToolExecutor::new(registry());
        let call = ToolCall {
            id: "1".into(),
            name: "nonexistent".into(),
            input: json!({}),
        };
        let result = executor.execute_one(&call, "agent-a", &[]).await;
        assert!(matches!(result, Err(TErr::NotFound(_))));
    }

    #[tokio::test]
    async fn policy_forbidden_blocks_call() {
        let executor = ToolExecutor::new(registry()).with_policy(Arc::new(FnPolicy(
            |name, _args, _prior| {
                if name == "write_file" {
                    PolicyDecision::Forbidden {
                        reason: "writes disabled".into(),
                    }
                } else {
                    PolicyDecision::Allow
                }
            },
        )));

        let call = ToolCall {
            id: "1".into(),
            name: "write_file".into(),
            input: json!({"path": "a.txt"}),
        };
        let result = executor.execute_one(&call, "agent-a", &[]).await;
        assert!(matches!(result, Err(TErr::PolicyForbidden(_))));
    }

    #[tokio::test]
    async fn safety_gate_blocks_unlisted_tool() {
        let executor = ToolExecutor::new(registry())
            .with_safety(Arc::new(AllowList::new(vec!["read_file".into()])));

        let call = ToolCall {
            id: "1".into(),
            name: "write_file".into(),
            input: json!({"path": "a.txt"}),
        };
        let result = executor.execute_one(&call, "agent-a", &[]).await;
        assert!(matches!(result, Err(TErr::SafetyRejected(_))));
    }

    #[tokio::test]
    async fn write_claims_and_releases_path() {
        let claims = Arc::new(InMemoryClaimStore::new());
        let executor =
            ToolExecutor::new(registry()).with_claims(claims.clone(), Duration::from_secs(60));

        let call = ToolCall {
            id: "1".into(),
            name: "write_file".into(),
            input: json!({"path": "a.txt"}),
        };
        executor.execute_one(&call, "agent-a", &[]).await.unwrap();
        // Claim released after a successful write, so another agent can
        // claim the same path immediately after.
        claims
            .try_claim("a.txt", "agent-b", Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn conflicting_write_claim_fails_the_call() {
        let claims = Arc::new(InMemoryClaimStore::new());
        claims
            .try_claim("a.txt", "agent-a", Duration::from_secs(60))
            .await
            .unwrap();
        let executor = ToolExecutor::new(registry()).with_claims(claims, Duration::from_secs(60));

        let call = ToolCall {
            id: "1".into(),
            name: "write_file".into(),
            input: json!({"path": "a.txt"}),
        };
        let result = executor.execute_one(&call, "agent-b", &[]).await;
        assert!(matches!(result, Err(TErr::PathClaimed { .. })));
    }

    #[tokio::test]
    async fn batch_runs_adjacent_read_only_calls_concurrently() {
        struct SlowReadTool(Arc<AtomicUsize>);
        impl ToolDyn for SlowReadTool {
            fn name(&self) -> &str {
                "slow_read"
            }
            fn description(&self) -> &str {
                "slow read"
            }
            fn input_schema(&self) -> serde_json::Value {
                json!({})
            }
            fn kind(&self) -> ToolKind {
                ToolKind::ReadOnly
            }
            fn call(
                &self,
                _input: serde_json::Value,
            ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, TErr>> + Send + '_>>
            {
                let inflight = self.0.clone();
                Box::pin(async move {
                    inflight.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(json!("done"))
                })
            }
        }

        let inflight = Arc::new(AtomicUsize::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(SlowReadTool(inflight.clone())));
        let executor = ToolExecutor::new(reg);

        let calls = vec![
            ToolCall {
                id: "1".into(),
                name: "slow_read".into(),
                input: json!({}),
            },
            ToolCall {
                id: "2".into(),
                name: "slow_read".into(),
                input: json!({}),
            },
        ];

        let start = std::time::Instant::now();
        let batch = executor.execute_batch(calls, "agent-a").await;
        let elapsed = start.elapsed();

        assert_eq!(batch.outcomes.len(), 2);
        assert!(batch.outcomes.iter().all(|o| o.result.is_ok()));
        // Two 20ms reads run concurrently, well under their serial sum.
        assert!(elapsed < Duration::from_millis(35));
    }

    #[tokio::test]
    async fn batch_serializes_write_calls() {
        let executor = ToolExecutor::new(registry());
        let calls = vec![
            ToolCall {
                id: "1".into(),
                name: "write_file".into(),
                input: json!({"path": "a.txt"}),
            },
            ToolCall {
                id: "2".into(),
                name: "read_file".into(),
                input: json!({"path": "a.txt"}),
            },
        ];
        let batch = executor.execute_batch(calls, "agent-a").await;
        assert_eq!(batch.outcomes.len(), 2);
        assert!(batch.outcomes[0].result.is_ok());
        assert!(batch.outcomes[1].result.is_ok());
    }

    #[tokio::test]
    async fn timeout_fails_slow_tool() {
        struct HangTool;
        impl ToolDyn for HangTool {
            fn name(&self) -> &str {
                "hang"
            }
            fn description(&self) -> &str {
                "never returns in time"
            }
            fn input_schema(&self) -> serde_json::Value {
                json!({})
            }
            fn kind(&self) -> ToolKind {
                ToolKind::ReadOnly
            }
            fn call(
                &self,
                _input: serde_json::Value,
            ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, TErr>> + Send + '_>>
            {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(json!("too late"))
                })
            }
        }
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(HangTool));
        let executor = ToolExecutor::new(reg).with_timeout(Duration::from_millis(10));

        let call = ToolCall {
            id: "1".into(),
            name: "hang".into(),
            input: json!({}),
        };
        let result = executor.execute_one(&call, "agent-a", &[]).await;
        assert!(matches!(result, Err(TErr::Timeout(_))));
    }
}
