//! Execution-policy evaluation for tool calls.

use async_trait::async_trait;

/// Outcome of evaluating `{tool, args, prior_calls}` against an execution
/// policy.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Execute without further confirmation.
    Allow,
    /// Escalate to a human-in-loop gate before executing. `reason` explains
    /// why approval is required; an approved prompt produces a bounded
    /// grant (the caller tracks how many further similar calls it covers).
    Prompt {
        /// Why this call requires approval.
        reason: String,
    },
    /// Refuse to execute. Raises an error; never reaches the tool.
    Forbidden {
        /// Why this call is forbidden.
        reason: String,
    },
}

/// Evaluates tool calls against an execution policy.
///
/// Implementations might consult a static allowlist, a budget, or a
/// stateful record of prior calls in the same turn.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Evaluate a single proposed call.
    async fn evaluate(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
        prior_calls: &[String],
    ) -> PolicyDecision;
}

/// A policy that allows every call. The default for configurations that
/// don't need a human-in-loop gate.
pub struct AllowAll;

#[async_trait]
impl PolicyEngine for AllowAll {
    async fn evaluate(
        &self,
        _tool_name: &str,
        _args: &serde_json::Value,
        _prior_calls: &[String],
    ) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

/// Blanket helper so closures can act as a `PolicyEngine` without a new
/// type for every ad hoc rule used in tests.
pub struct FnPolicy<F>(pub F)
where
    F: Fn(&str, &serde_json::Value, &[String]) -> PolicyDecision + Send + Sync;

#[async_trait]
impl<F> PolicyEngine for FnPolicy<F>
where
    F: Fn(&str, &serde_json::Value, &[String]) -> PolicyDecision + Send + Sync,
{
    async fn evaluate(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
        prior_calls: &[String],
    ) -> PolicyDecision {
        (self.0)(tool_name, args, prior_calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn allow_all_always_allows() {
        let policy = AllowAll;
        let decision = policy.evaluate("read_file", &json!({}), &[]).await;
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[tokio::test]
    async fn fn_policy_forbids_destructive_shell() {
        let policy = FnPolicy(|name, _args, _prior| {
            if name == "shell_rm" {
                PolicyDecision::Forbidden {
                    reason: "destructive shell commands are blocked".into(),
                }
            } else {
                PolicyDecision::Allow
            }
        });

        assert_eq!(
            policy.evaluate("shell_rm", &json!({}), &[]).await,
            PolicyDecision::Forbidden {
                reason: "destructive shell commands are blocked".into()
            }
        );
        assert_eq!(
            policy.evaluate("read_file", &json!({}), &[]).await,
            PolicyDecision::Allow
        );
    }

    #[tokio::test]
    async fn fn_policy_prompts_based_on_prior_calls() {
        let policy = FnPolicy(|_name, _args, prior| {
            if prior.len() >= 3 {
                PolicyDecision::Prompt {
                    reason: "more than 3 similar calls this turn".into(),
                }
            } else {
                PolicyDecision::Allow
            }
        });

        let prior = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        match policy.evaluate("write_file", &json!({}), &prior).await {
            PolicyDecision::Prompt { .. } => {}
            other => panic!("expected Prompt, got {other:?}"),
        }
    }
}
