//! Subagent spawning: deduplication, budget-pool allocation, blackboard
//! context assembly, graceful-timeout cancellation, and result bubbling.
//!
//! [`Spawner`] sits above an [`Orchestrator`] — it doesn't run agents
//! itself, it decides *whether* to dispatch (dedup), *how much* budget
//! to hand the child, *what* system-prompt context to inject, and *how*
//! to fold the child's outcome back into a uniform [`SpawnResult`]
//! regardless of whether the child finished, errored, or was cancelled.

#![deny(missing_docs)]

mod dedup;
mod lifecycle;

pub use dedup::{DedupCache, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_WINDOW};
pub use lifecycle::GracefulTimeout;

use agentcore_proto::content::Content;
use agentcore_proto::duration::DurationMs;
use agentcore_proto::effect::Effect;
use agentcore_proto::id::AgentId;
use agentcore_proto::orchestrator::Orchestrator;
use agentcore_proto::turn::{ExitReason, TriggerType, TurnConfig, TurnInput};
use core_substrate::{Blackboard, BudgetPool, CancellationToken, ChildBudget, FindingQuery};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-spawn overrides layered on top of [`SpawnConfig`]'s defaults.
#[derive(Debug, Clone, Default)]
pub struct SpawnConstraints {
    /// Hard timeout for this spawn, overriding the agent-type default.
    pub timeout: Option<Duration>,
    /// Restrict the child to this tool set. `None` uses the agent's own default.
    pub allowed_tools: Option<Vec<String>>,
    /// Extra instructions appended to the child's system prompt.
    pub extra_system_prompt: Option<String>,
    /// Explicit token request, capped by the pool's fraction-of-remaining rule.
    pub requested_tokens: Option<u64>,
    /// Override the pool allocation fraction for this spawn.
    pub budget_fraction: Option<f64>,
}

/// Tunables for the spawner that don't vary per call.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Timeout used when an agent type has no entry in `timeouts_by_agent_type`.
    pub default_timeout: Duration,
    /// Per-agent-type timeout overrides — e.g. a researcher running
    /// longer than a reviewer. Supplied by the caller, never hardcoded.
    pub timeouts_by_agent_type: HashMap<String, Duration>,
    /// How long before the hard deadline the wrap-up warning fires.
    pub wrapup_window: Duration,
    /// Fraction of the remaining pool a child may claim absent an override.
    pub budget_fraction: f64,
    /// Token floor granted to a child when no budget pool is configured.
    pub min_child_tokens: u64,
    /// Minimum confidence for blackboard findings surfaced to a child.
    pub blackboard_min_confidence: f64,
    /// Maximum number of blackboard findings surfaced to a child.
    pub blackboard_finding_limit: usize,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10 * 60),
            timeouts_by_agent_type: HashMap::new(),
            wrapup_window: Duration::from_secs(30),
            budget_fraction: 0.25,
            min_child_tokens: 100_000,
            blackboard_min_confidence: 0.7,
            blackboard_finding_limit: 10,
        }
    }
}

/// A plan-mode write a child queued rather than executed, annotated with
/// the child that proposed it so the parent's plan can attribute changes.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedChange {
    /// The tool the change would invoke once approved.
    pub tool: String,
    /// Arguments for that tool call.
    pub args: serde_json::Value,
    /// Human-readable summary of the change.
    pub description: String,
    /// Name of the agent that proposed it.
    pub proposed_by: String,
}

/// A structured wrap-up report a child may emit on request (or when it
/// recognizes it's close to its own resource limits). Best-effort: only
/// populated when the child's final text happens to parse as this shape.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClosureReport {
    /// Notable discoveries made during the task.
    #[serde(default)]
    pub findings: Vec<String>,
    /// Concrete actions the child actually took.
    #[serde(default, rename = "actionsTaken")]
    pub actions_taken: Vec<String>,
    /// Things the child attempted and failed at.
    #[serde(default)]
    pub failures: Vec<String>,
    /// Work the child identified but did not get to.
    #[serde(default, rename = "remainingWork")]
    pub remaining_work: Vec<String>,
    /// The child's suggestion for what the parent should do next.
    #[serde(default, rename = "suggestedNextSteps")]
    pub suggested_next_steps: Vec<String>,
    /// Why the child stopped, in its own words.
    #[serde(default, rename = "exitReason")]
    pub exit_reason: Option<String>,
}

fn parse_closure_report(text: &str) -> Option<ClosureReport> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(report) = serde_json::from_str::<ClosureReport>(trimmed) {
        return Some(report);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Resource usage for one spawn, always populated even on failure or
/// cancellation so budget accounting never silently under-counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnMetrics {
    /// Input tokens consumed across the child's run.
    pub tokens_in: u64,
    /// Output tokens generated across the child's run.
    pub tokens_out: u64,
    /// Cost accrued in USD.
    pub cost: Decimal,
    /// Number of tool calls the child made.
    pub tool_calls: u32,
    /// Wall-clock duration observed by the spawner (child duration plus
    /// dispatch overhead, not the child's own internal accounting).
    pub duration: DurationMs,
    /// Reasoning-loop iterations the child used.
    pub iterations: u32,
}

impl Default for SpawnMetrics {
    fn default() -> Self {
        Self {
            tokens_in: 0,
            tokens_out: 0,
            cost: Decimal::ZERO,
            tool_calls: 0,
            duration: DurationMs::ZERO,
            iterations: 0,
        }
    }
}

/// Outcome of one `spawn` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnResult {
    /// Whether the child completed its task.
    pub success: bool,
    /// The child's final text, possibly prefixed with a
    /// "DUPLICATE SPAWN PREVENTED" or "PLAN MODE - CHANGES QUEUED TO
    /// PARENT" header.
    pub output: String,
    /// Resource usage, always populated.
    pub metrics: SpawnMetrics,
    /// A structured closure report, if the child's output parsed as one.
    pub structured: Option<ClosureReport>,
    /// Plan-mode writes the child queued, to be merged into the parent's plan.
    pub proposed_changes: Vec<ProposedChange>,
    /// Whether this result came from the dedup cache rather than a fresh dispatch.
    pub deduplicated: bool,
}

fn resource_awareness_block(budget: &ChildBudget, timeout: Duration) -> String {
    format!(
        "You have a token budget of {} tokens and a time budget of {}ms for this task. \
         If you are asked to wrap up, or sense you are close to either limit, stop exploring \
         and respond with a structured closure report: a JSON object with keys findings, \
         actionsTaken, failures, remainingWork, suggestedNextSteps, and exitReason.",
        budget.tokens,
        timeout.as_millis()
    )
}

fn extract_proposed_changes(agent_name: &str, effects: &[Effect]) -> Vec<ProposedChange> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Custom { effect_type, data } if effect_type == "proposed_change" => {
                let tool = data.get("tool")?.as_str()?.to_string();
                let args = data.get("args").cloned().unwrap_or(serde_json::Value::Null);
                let description = data
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                Some(ProposedChange {
                    tool,
                    args,
                    description,
                    proposed_by: agent_name.to_string(),
                })
            }
            _ => None,
        })
        .collect()
}

fn duplicate_spawn_result(previous: &SpawnResult) -> SpawnResult {
    let mut output = String::from(
        "DUPLICATE SPAWN PREVENTED: an equivalent task was already queued within the last minute.\n",
    );
    if !previous.proposed_changes.is_empty() {
        output.push_str("Previously queued changes:\n");
        for change in &previous.proposed_changes {
            output.push_str(&format!("- ({}) {}\n", change.proposed_by, change.description));
        }
    }
    output.push_str("\n--- previous output ---\n");
    output.push_str(&previous.output);

    SpawnResult {
        success: previous.success,
        output,
        metrics: SpawnMetrics::default(),
        structured: previous.structured.clone(),
        proposed_changes: previous.proposed_changes.clone(),
        deduplicated: true,
    }
}

/// Spawns and supervises subagents on top of an [`Orchestrator`].
pub struct Spawner {
    orch: Arc<dyn Orchestrator>,
    blackboard: Arc<Blackboard>,
    budget_pool: Option<Arc<BudgetPool>>,
    parent_token: CancellationToken,
    dedup: DedupCache,
    config: SpawnConfig,
}

impl Spawner {
    /// Build a spawner over an arbitrary orchestrator implementation.
    pub fn new(
        orch: Arc<dyn Orchestrator>,
        blackboard: Arc<Blackboard>,
        budget_pool: Option<Arc<BudgetPool>>,
        parent_token: CancellationToken,
        config: SpawnConfig,
    ) -> Self {
        Self {
            orch,
            blackboard,
            budget_pool,
            parent_token,
            dedup: DedupCache::new(),
            config,
        }
    }

    async fn blackboard_context(&self) -> String {
        let findings = self
            .blackboard
            .query(&FindingQuery {
                min_confidence: self.config.blackboard_min_confidence,
                limit: self.config.blackboard_finding_limit,
                ..Default::default()
            })
            .await;
        if findings.is_empty() {
            return String::new();
        }
        let mut block = String::from("Recent high-confidence findings from other agents:\n");
        for finding in findings {
            block.push_str(&format!(
                "- [{}] ({:.2}) {}\n",
                finding.agent, finding.confidence, finding.content
            ));
        }
        block
    }

    fn timeout_for(&self, agent_name: &str, constraints: &SpawnConstraints) -> Duration {
        constraints.timeout.unwrap_or_else(|| {
            self.config
                .timeouts_by_agent_type
                .get(agent_name)
                .copied()
                .unwrap_or(self.config.default_timeout)
        })
    }

    fn allocate_budget(&self, constraints: &SpawnConstraints) -> ChildBudget {
        match &self.budget_pool {
            Some(pool) => pool.allocate(
                constraints.requested_tokens.unwrap_or(u64::MAX),
                constraints.budget_fraction.unwrap_or(self.config.budget_fraction),
            ),
            None => ChildBudget {
                tokens: self.config.min_child_tokens,
            },
        }
    }

    /// Spawn one child agent for `task`. Always returns a [`SpawnResult`]
    /// — dispatch failures and cancellations are folded into it rather
    /// than propagated, so callers get resource metrics unconditionally.
    pub async fn spawn(
        &self,
        agent_name: &str,
        task: &str,
        constraints: Option<SpawnConstraints>,
    ) -> SpawnResult {
        let constraints = constraints.unwrap_or_default();

        if let Some(previous) = self.dedup.find_duplicate(agent_name, task).await {
            return duplicate_spawn_result(&previous);
        }

        let child_budget = self.allocate_budget(&constraints);
        let timeout = self.timeout_for(agent_name, &constraints);
        let watchdog = Arc::new(GracefulTimeout::new(&self.parent_token, timeout, self.config.wrapup_window));
        let watcher_handle = tokio::spawn({
            let watchdog = Arc::clone(&watchdog);
            async move { watchdog.watch().await }
        });

        let mut addendum = self.blackboard_context().await;
        if let Some(extra) = &constraints.extra_system_prompt {
            if !addendum.is_empty() {
                addendum.push('\n');
            }
            addendum.push_str(extra);
        }
        if !addendum.is_empty() {
            addendum.push('\n');
        }
        addendum.push_str(&resource_awareness_block(&child_budget, timeout));

        let mut input = TurnInput::new(Content::text(task), TriggerType::Task);
        let mut turn_config = TurnConfig::default();
        turn_config.max_duration = Some(DurationMs::from(timeout));
        turn_config.wrapup_window = Some(DurationMs::from(self.config.wrapup_window));
        turn_config.allowed_tools = constraints.allowed_tools.clone();
        turn_config.system_addendum = Some(addendum);
        input.config = Some(turn_config);

        let started = Instant::now();
        let agent_id = AgentId::new(agent_name);

        let watchdog_token = watchdog.token();
        let outcome = tokio::select! {
            result = self.orch.dispatch(&agent_id, input) => Some(result),
            () = watchdog_token.cancelled() => None,
        };
        watcher_handle.abort();

        let elapsed = DurationMs::from(started.elapsed());
        let spawn_result = match outcome {
            Some(Ok(output)) => {
                let proposed_changes = extract_proposed_changes(agent_name, &output.effects);
                let text = output.message.as_text().unwrap_or("").to_string();
                let structured = parse_closure_report(&text);
                let success = matches!(output.exit_reason, ExitReason::Complete);

                let mut final_output = text;
                if !proposed_changes.is_empty() {
                    let mut header =
                        String::from("PLAN MODE - CHANGES QUEUED TO PARENT:\n");
                    for change in &proposed_changes {
                        header.push_str(&format!("- {}\n", change.description));
                    }
                    header.push_str("\n--- output ---\n");
                    final_output = format!("{header}{final_output}");
                }

                SpawnResult {
                    success,
                    output: final_output,
                    metrics: SpawnMetrics {
                        tokens_in: output.metadata.tokens_in,
                        tokens_out: output.metadata.tokens_out,
                        cost: output.metadata.cost,
                        tool_calls: output.metadata.tools_called.len() as u32,
                        duration: elapsed,
                        iterations: output.metadata.turns_used,
                    },
                    structured,
                    proposed_changes,
                    deduplicated: false,
                }
            }
            Some(Err(err)) => SpawnResult {
                success: false,
                output: format!("spawn of {agent_name} failed: {err}"),
                metrics: SpawnMetrics {
                    duration: elapsed,
                    ..SpawnMetrics::default()
                },
                structured: None,
                proposed_changes: Vec::new(),
                deduplicated: false,
            },
            // Hard-cancel backstop: the child never returned even after its
            // wrap-up window, so there is no partial output to recover.
            None => SpawnResult {
                success: false,
                output: format!(
                    "spawn of {agent_name} was cancelled after {}ms without producing output",
                    elapsed.as_millis()
                ),
                metrics: SpawnMetrics {
                    duration: elapsed,
                    ..SpawnMetrics::default()
                },
                structured: Some(ClosureReport {
                    exit_reason: Some("cancelled".to_string()),
                    ..ClosureReport::default()
                }),
                proposed_changes: Vec::new(),
                deduplicated: false,
            },
        };

        if let Some(pool) = &self.budget_pool {
            let spent = spawn_result.metrics.tokens_in + spawn_result.metrics.tokens_out;
            pool.release(child_budget.unused(spent));
        }
        self.blackboard.release_all(agent_name).await;
        self.dedup.record(agent_name, task, spawn_result.clone()).await;

        spawn_result
    }

    /// Spawn a batch of children concurrently, settle-all: one child's
    /// failure or cancellation never prevents the others from completing.
    pub async fn spawn_many(
        self: &Arc<Self>,
        requests: Vec<(String, String, Option<SpawnConstraints>)>,
    ) -> Vec<SpawnResult> {
        let batch_size = requests.len();
        tracing::debug!(batch_size, "spawning subagent batch");

        let mut handles = Vec::with_capacity(requests.len());
        for (agent_name, task, constraints) in requests {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                this.spawn(&agent_name, &task, constraints).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => results.push(SpawnResult {
                    success: false,
                    output: format!("subagent task panicked: {join_err}"),
                    metrics: SpawnMetrics::default(),
                    structured: None,
                    proposed_changes: Vec::new(),
                    deduplicated: false,
                }),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore_proto::error::TurnError;
    use agentcore_proto::turn::{Turn, TurnMetadata, TurnOutput};
    use async_trait::async_trait;
    use core_orch_local::LocalOrch;

    struct EchoAgent;

    #[async_trait]
    impl Turn for EchoAgent {
        async fn execute(&self, input: TurnInput) -> Result<TurnOutput, TurnError> {
            let text = input.message.as_text().unwrap_or_default().to_string();
            Ok(TurnOutput::new(Content::text(format!("echo: {text}")), ExitReason::Complete))
        }
    }

    struct PlanningAgent;

    #[async_trait]
    impl Turn for PlanningAgent {
        async fn execute(&self, input: TurnInput) -> Result<TurnOutput, TurnError> {
            let text = input.message.as_text().unwrap_or_default().to_string();
            let mut output = TurnOutput::new(Content::text(format!("explored: {text}")), ExitReason::Complete);
            output.effects.push(Effect::Custom {
                effect_type: "proposed_change".to_string(),
                data: serde_json::json!({
                    "tool": "write_file",
                    "args": {"path": "src/lib.rs"},
                    "description": "add a missing doc comment",
                }),
            });
            Ok(output)
        }
    }

    struct HangingAgent;

    #[async_trait]
    impl Turn for HangingAgent {
        async fn execute(&self, _input: TurnInput) -> Result<TurnOutput, TurnError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(TurnOutput::new(Content::text("too late"), ExitReason::Complete))
        }
    }

    /// Honors the wrap-up window it's handed instead of ignoring it like
    /// [`HangingAgent`]: it stops and reports once `max_duration -
    /// wrapup_window` elapses, same as `ExecutionLoop`'s internal
    /// wrap-up conversion does for a real tool-using turn.
    struct WrapUpAwareAgent;

    #[async_trait]
    impl Turn for WrapUpAwareAgent {
        async fn execute(&self, input: TurnInput) -> Result<TurnOutput, TurnError> {
            let config = input.config.unwrap_or_default();
            let max_duration = config.max_duration.unwrap_or(DurationMs::from_secs(1)).as_millis();
            let wrapup_window = config.wrapup_window.unwrap_or(DurationMs::ZERO).as_millis();
            tokio::time::sleep(Duration::from_millis(max_duration.saturating_sub(wrapup_window))).await;
            Ok(TurnOutput::new(
                Content::text("ran out of time; here's what I found so far"),
                ExitReason::Complete,
            ))
        }
    }

    fn build_spawner(orch: LocalOrch) -> Arc<Spawner> {
        Arc::new(Spawner::new(
            Arc::new(orch),
            Arc::new(Blackboard::new(100)),
            None,
            CancellationToken::new(),
            SpawnConfig::default(),
        ))
    }

    #[tokio::test]
    async fn spawn_dispatches_and_reports_metrics() {
        let mut orch = LocalOrch::new();
        orch.register(AgentId::new("echo"), Arc::new(EchoAgent));
        let spawner = build_spawner(orch);

        let result = spawner.spawn("echo", "hello", None).await;
        assert!(result.success);
        assert!(result.output.contains("echo: hello"));
        assert!(!result.deduplicated);
    }

    #[tokio::test]
    async fn repeated_equivalent_task_is_deduplicated() {
        let mut orch = LocalOrch::new();
        orch.register(AgentId::new("echo"), Arc::new(EchoAgent));
        let spawner = build_spawner(orch);

        let first = spawner.spawn("echo", "investigate the bug", None).await;
        let second = spawner.spawn("echo", "investigate the bug", None).await;
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert!(second.output.starts_with("DUPLICATE SPAWN PREVENTED"));
    }

    #[tokio::test]
    async fn unknown_agent_surfaces_as_failed_spawn_not_a_panic() {
        let orch = LocalOrch::new();
        let spawner = build_spawner(orch);

        let result = spawner.spawn("missing", "do something", None).await;
        assert!(!result.success);
        assert!(result.output.contains("missing"));
    }

    #[tokio::test]
    async fn proposed_changes_surface_with_plan_header() {
        let mut orch = LocalOrch::new();
        orch.register(AgentId::new("planner"), Arc::new(PlanningAgent));
        let spawner = build_spawner(orch);

        let result = spawner.spawn("planner", "plan a fix", None).await;
        assert_eq!(result.proposed_changes.len(), 1);
        assert_eq!(result.proposed_changes[0].proposed_by, "planner");
        assert!(result.output.contains("PLAN MODE - CHANGES QUEUED TO PARENT"));
    }

    #[tokio::test]
    async fn non_cooperative_turn_is_hard_cancelled_after_wrapup() {
        let mut orch = LocalOrch::new();
        orch.register(AgentId::new("slow"), Arc::new(HangingAgent));
        let spawner = Arc::new(Spawner::new(
            Arc::new(orch),
            Arc::new(Blackboard::new(100)),
            None,
            CancellationToken::new(),
            SpawnConfig {
                default_timeout: Duration::from_millis(20),
                wrapup_window: Duration::from_millis(10),
                ..SpawnConfig::default()
            },
        ));

        let result = spawner.spawn("slow", "take forever", None).await;
        assert!(!result.success);
        assert!(result.structured.is_some());
        assert_eq!(result.structured.unwrap().exit_reason.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn wrapup_window_recovers_partial_output_before_hard_cancel() {
        let mut orch = LocalOrch::new();
        orch.register(AgentId::new("patient"), Arc::new(WrapUpAwareAgent));
        let spawner = Arc::new(Spawner::new(
            Arc::new(orch),
            Arc::new(Blackboard::new(100)),
            None,
            CancellationToken::new(),
            SpawnConfig {
                default_timeout: Duration::from_millis(60),
                wrapup_window: Duration::from_millis(30),
                ..SpawnConfig::default()
            },
        ));

        let result = spawner.spawn("patient", "find the bug", None).await;
        assert!(result.success);
        assert!(result.output.contains("here's what I found so far"));
    }

    #[tokio::test]
    async fn parallel_spawn_settles_all_even_with_one_failure() {
        let mut orch = LocalOrch::new();
        orch.register(AgentId::new("echo"), Arc::new(EchoAgent));
        let spawner = build_spawner(orch);

        let requests = vec![
            ("echo".to_string(), "task one".to_string(), None),
            ("missing".to_string(), "task two".to_string(), None),
            ("echo".to_string(), "task three".to_string(), None),
        ];
        let results = spawner.spawn_many(requests).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[2].success);
    }

    #[test]
    fn closure_report_parses_from_fenced_json() {
        let text = "Here's my summary:\n```json\n{\"findings\": [\"a\"], \"exitReason\": \"done\"}\n```\n";
        let report = parse_closure_report(text).expect("should parse");
        assert_eq!(report.findings, vec!["a".to_string()]);
        assert_eq!(report.exit_reason.as_deref(), Some("done"));
    }
}
