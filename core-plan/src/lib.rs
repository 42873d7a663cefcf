//! Plan-mode manager: a write-interception queue between "the model
//! decided to make a change" and "the change actually happened."
//!
//! A `Turn` implementation that supports plan mode routes would-be write
//! tool calls through [`PlanManager::add_proposed_change`] instead of
//! executing them immediately. The model (or a human) reviews the
//! queue via [`PlanManager::format_plan`], then [`PlanManager::approve`]
//! runs the batch through an injected [`ChangeExecutor`].

#![deny(missing_docs)]

mod executor;

pub use executor::{ChangeError, ChangeExecutor};

use agentcore_proto::duration::DurationMs;
use agentcore_proto::lifecycle::{EventSource, ObservableEvent};
use serde::{Deserialize, Serialize};

/// Whether the manager is accepting new proposed changes or has switched
/// over to execute an approved batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Writes are queued, not executed.
    Plan,
    /// Writes (including an approved batch) execute immediately.
    Build,
}

/// A queued write, not yet executed.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedChange {
    /// Monotonic id, unique within one manager's lifetime.
    pub id: u64,
    /// The tool this change would invoke.
    pub tool: String,
    /// Arguments for that tool call.
    pub args: serde_json::Value,
    /// Why the model wants to make this change.
    pub reason: String,
    /// Agent that proposed it, if this change came from a subagent.
    pub source: Option<String>,
}

/// What happened when a queued change was executed.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeOutcome {
    /// The executor ran the change and returned a value.
    Success {
        /// The executor's return value.
        value: serde_json::Value,
    },
    /// The executor rejected or failed to run the change.
    Failure {
        /// The error, rendered as text.
        error: String,
    },
}

/// One change's outcome after a batch approval.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeResult {
    /// The change that was executed.
    pub change: ProposedChange,
    /// Its outcome.
    pub outcome: ChangeOutcome,
}

#[derive(Debug, Clone, Default)]
struct Plan {
    task: String,
    changes: Vec<ProposedChange>,
}

/// Misuse of the plan-mode manager.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanError {
    /// `add_proposed_change` or `approve` was called with no active plan.
    #[error("no active plan - call start_plan first")]
    NoActivePlan,
}

/// Result of [`PlanManager::approve`]: per-change outcomes plus the
/// observability events a caller should forward to its own event sink.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    /// Outcome of each executed change, in execution order.
    pub results: Vec<ChangeResult>,
    /// One event per executed change.
    pub events: Vec<ObservableEvent>,
}

/// Queues proposed tool writes during plan mode and executes them in
/// order on approval, restoring the prior mode afterward.
pub struct PlanManager {
    mode: Mode,
    plan: Option<Plan>,
    next_id: u64,
}

impl PlanManager {
    /// Create a manager in build mode with no active plan.
    pub fn new() -> Self {
        Self {
            mode: Mode::Build,
            plan: None,
            next_id: 0,
        }
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Number of changes queued in the active plan, zero if none.
    pub fn pending_count(&self) -> usize {
        self.plan.as_ref().map_or(0, |p| p.changes.len())
    }

    /// Begin plan mode for `task`, replacing any existing plan.
    pub fn start_plan(&mut self, task: impl Into<String>) {
        self.mode = Mode::Plan;
        self.plan = Some(Plan {
            task: task.into(),
            changes: Vec::new(),
        });
    }

    /// Queue a write instead of executing it. Fails if no plan is active.
    pub fn add_proposed_change(
        &mut self,
        tool: impl Into<String>,
        args: serde_json::Value,
        reason: impl Into<String>,
        source: Option<String>,
    ) -> Result<u64, PlanError> {
        let plan = self.plan.as_mut().ok_or(PlanError::NoActivePlan)?;
        let id = self.next_id;
        self.next_id += 1;
        plan.changes.push(ProposedChange {
            id,
            tool: tool.into(),
            args,
            reason: reason.into(),
            source,
        });
        Ok(id)
    }

    /// Discard the active plan entirely and return to build mode.
    pub fn reject(&mut self) {
        self.plan = None;
        self.mode = Mode::Build;
    }

    /// Empty the active plan's change queue without leaving plan mode.
    pub fn clear(&mut self) {
        if let Some(plan) = &mut self.plan {
            plan.changes.clear();
        }
    }

    /// Render the plan as a numbered list for display to a user or a
    /// parent agent.
    pub fn format_plan(&self) -> String {
        let Some(plan) = &self.plan else {
            return "No active plan.".to_string();
        };
        if plan.changes.is_empty() {
            return format!("Plan for \"{}\": no changes queued yet.", plan.task);
        }
        let mut out = format!("Plan for \"{}\":\n", plan.task);
        for (i, change) in plan.changes.iter().enumerate() {
            let attribution = change
                .source
                .as_ref()
                .map(|s| format!(" (proposed by {s})"))
                .unwrap_or_default();
            out.push_str(&format!("{}. {} — {}{}\n", i + 1, change.tool, change.reason, attribution));
        }
        out
    }

    /// Execute up to `count` queued changes (all, if `None`) in order,
    /// switching to build mode for the duration and restoring the mode
    /// that was active before the call. Errors from individual changes
    /// are collected rather than aborting the batch.
    pub async fn approve<E: ChangeExecutor>(
        &mut self,
        executor: &E,
        count: Option<usize>,
    ) -> Result<ApprovalOutcome, PlanError> {
        let plan = self.plan.as_mut().ok_or(PlanError::NoActivePlan)?;
        let take = count.unwrap_or(plan.changes.len()).min(plan.changes.len());
        let batch: Vec<ProposedChange> = plan.changes.drain(..take).collect();

        let previous_mode = self.mode;
        self.mode = Mode::Build;

        let mut results = Vec::with_capacity(batch.len());
        let mut events = Vec::with_capacity(batch.len());
        for change in batch {
            let outcome = match executor.execute(&change.tool, change.args.clone()).await {
                Ok(value) => ChangeOutcome::Success { value },
                Err(err) => ChangeOutcome::Failure { error: err.to_string() },
            };
            events.push(ObservableEvent::new(
                EventSource::Orchestration,
                "plan.change_executed",
                DurationMs::ZERO,
                serde_json::json!({
                    "change_id": change.id,
                    "tool": change.tool,
                    "success": matches!(outcome, ChangeOutcome::Success { .. }),
                }),
            ));
            results.push(ChangeResult { change, outcome });
        }

        self.mode = previous_mode;
        Ok(ApprovalOutcome { results, events })
    }
}

impl Default for PlanManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingExecutor {
        calls: AtomicUsize,
        fail_tool: Option<&'static str>,
        executed: Mutex<Vec<String>>,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_tool: None,
                executed: Mutex::new(Vec::new()),
            }
        }

        fn failing(tool: &'static str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_tool: Some(tool),
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    impl ChangeExecutor for RecordingExecutor {
        async fn execute(&self, tool: &str, args: serde_json::Value) -> Result<serde_json::Value, ChangeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.executed.lock().unwrap().push(tool.to_string());
            if self.fail_tool == Some(tool) {
                return Err(ChangeError(format!("{tool} rejected")));
            }
            Ok(args)
        }
    }

    #[test]
    fn add_proposed_change_requires_an_active_plan() {
        let mut manager = PlanManager::new();
        let err = manager
            .add_proposed_change("write_file", serde_json::json!({}), "because", None)
            .unwrap_err();
        assert!(matches!(err, PlanError::NoActivePlan));
    }

    #[test]
    fn start_plan_enters_plan_mode_and_queues_changes() {
        let mut manager = PlanManager::new();
        manager.start_plan("fix the bug");
        assert_eq!(manager.mode(), Mode::Plan);

        manager
            .add_proposed_change("write_file", serde_json::json!({"path": "a.rs"}), "fix a.rs", None)
            .unwrap();
        assert_eq!(manager.pending_count(), 1);

        let formatted = manager.format_plan();
        assert!(formatted.contains("write_file"));
        assert!(formatted.contains("fix a.rs"));
    }

    #[test]
    fn reject_clears_plan_and_returns_to_build_mode() {
        let mut manager = PlanManager::new();
        manager.start_plan("task");
        manager
            .add_proposed_change("write_file", serde_json::json!({}), "reason", None)
            .unwrap();
        manager.reject();
        assert_eq!(manager.mode(), Mode::Build);
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn clear_empties_the_queue_without_leaving_plan_mode() {
        let mut manager = PlanManager::new();
        manager.start_plan("task");
        manager
            .add_proposed_change("write_file", serde_json::json!({}), "reason", None)
            .unwrap();
        manager.clear();
        assert_eq!(manager.mode(), Mode::Plan);
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn approve_executes_in_order_and_restores_plan_mode() {
        let mut manager = PlanManager::new();
        manager.start_plan("task");
        manager
            .add_proposed_change("write_file", serde_json::json!({"n": 1}), "first", None)
            .unwrap();
        manager
            .add_proposed_change("write_file", serde_json::json!({"n": 2}), "second", Some("researcher".into()))
            .unwrap();

        let executor = RecordingExecutor::new();
        let outcome = manager.approve(&executor, None).await.unwrap();

        assert_eq!(outcome.results.len(), 2);
        assert!(matches!(outcome.results[0].outcome, ChangeOutcome::Success { .. }));
        assert_eq!(executor.executed.lock().unwrap().as_slice(), ["write_file", "write_file"]);
        assert_eq!(manager.mode(), Mode::Plan);
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(outcome.events.len(), 2);
    }

    #[tokio::test]
    async fn approve_collects_errors_without_aborting_the_batch() {
        let mut manager = PlanManager::new();
        manager.start_plan("task");
        manager
            .add_proposed_change("delete_file", serde_json::json!({}), "cleanup", None)
            .unwrap();
        manager
            .add_proposed_change("write_file", serde_json::json!({}), "then write", None)
            .unwrap();

        let executor = RecordingExecutor::failing("delete_file");
        let outcome = manager.approve(&executor, None).await.unwrap();

        assert!(matches!(outcome.results[0].outcome, ChangeOutcome::Failure { .. }));
        assert!(matches!(outcome.results[1].outcome, ChangeOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn approve_with_count_executes_only_a_prefix() {
        let mut manager = PlanManager::new();
        manager.start_plan("task");
        manager.add_proposed_change("a", serde_json::json!({}), "r", None).unwrap();
        manager.add_proposed_change("b", serde_json::json!({}), "r", None).unwrap();
        manager.add_proposed_change("c", serde_json::json!({}), "r", None).unwrap();

        let executor = RecordingExecutor::new();
        let outcome = manager.approve(&executor, Some(2)).await.unwrap();

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(manager.pending_count(), 1);
    }

    #[tokio::test]
    async fn approve_without_a_plan_errors() {
        let mut manager = PlanManager::new();
        let executor = RecordingExecutor::new();
        let err = manager.approve(&executor, None).await.unwrap_err();
        assert!(matches!(err, PlanError::NoActivePlan));
    }
}
