#![deny(missing_docs)]
//! The execution loop: reason (LLM call) → act (tool dispatch) → observe
//! (ingest results) → repeat, wrapped in budget enforcement, loop
//! detection, and resilience against provider flakiness.
//!
//! [`ExecutionLoop`] implements `agentcore_proto::turn::Turn` — it is the
//! concrete turn runtime a coding agent actually runs. Everything that
//! makes an agentic loop trustworthy rather than merely functional lives
//! here: a model call never silently loops forever, a repeated tool call
//! gets interrupted, and a budget overrun produces a structured partial
//! result instead of an unbounded bill.

mod budget;
mod config;
mod future_intent;
mod resilience;

pub use budget::{fingerprint, BudgetDimension, BudgetEngine, BudgetStatus, BudgetUsage, LoopDetector, PausableClock};
pub use config::{BudgetLimits, LoopConfig, LoopDetectionConfig, ResilienceConfig};
pub use future_intent::looks_like_future_intent;
pub use resilience::{call_with_resilience, ResilienceError, ResilientCompletion};

use agentcore_proto::content::Content;
use agentcore_proto::duration::DurationMs;
use agentcore_proto::effect::Effect;
use agentcore_proto::error::TurnError;
use agentcore_proto::hook::{HookAction, HookContext, HookPoint};
use agentcore_proto::turn::{ExitReason, ToolCallRecord, Turn, TurnInput, TurnMetadata, TurnOutput};
use async_trait::async_trait;
use core_context::convert::content_to_user_message;
use core_context::provider::Provider;
use core_context::types::{ContentPart, ProviderMessage, ProviderRequest, Role, ToolSchema};
use core_context::{compact_tool_outputs, recite, ContextConfig, ContextStrategy, ReversibleCompaction};
use core_hooks::HookRegistry;
use core_plan::PlanManager;
use core_substrate::{CancellationToken, TraceEvent, TraceSink, TracingSink};
use core_tool::{is_write, ToolCall, ToolExecutor};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Prompt pushed once a turn crosses into its wrap-up window. Mirrors the
/// JSON shape a spawner's resource-awareness addendum already asks a
/// child to produce, so either path lands on the same structured report.
const WRAPUP_PROMPT: &str = "You are approaching your time budget. Stop exploring and \
    respond now with a structured closure report: a JSON object with keys findings, \
    actionsTaken, failures, remainingWork, suggestedNextSteps, and exitReason.";

/// Tool-call names that are intercepted as protocol [`Effect`]s rather
/// than dispatched through the tool executor. A call to one of these
/// never reaches [`ToolExecutor`] — it is parsed directly into an
/// `Effect` and returned on [`TurnOutput::effects`] for the calling
/// layer to execute.
const EFFECT_TOOL_NAMES: &[&str] = &["write_memory", "delete_memory", "signal", "delegate", "log", "custom"];

/// Parse a proposed tool call into an [`Effect`] if its name names one.
/// Effect tool arguments mirror the corresponding `Effect` variant's
/// fields exactly, so parsing is just re-tagging the JSON with the
/// variant name serde already expects and deserializing straight through.
fn try_as_effect(name: &str, args: &serde_json::Value) -> Option<Result<Effect, serde_json::Error>> {
    if !EFFECT_TOOL_NAMES.contains(&name) {
        return None;
    }
    let mut tagged = args.clone();
    if let serde_json::Value::Object(map) = &mut tagged {
        map.insert("type".to_string(), serde_json::Value::String(name.to_string()));
    }
    Some(serde_json::from_value(tagged))
}

/// JSON Schemas for the effect pseudo-tools, appended to whatever real
/// tools are registered so the model can request memory writes, signals,
/// and delegation the same way it requests any other tool.
fn effect_tool_schemas() -> Vec<ToolSchema> {
    let generic = serde_json::json!({"type": "object"});
    [
        ("write_memory", "Write a value into persistent memory at the given scope and key."),
        ("delete_memory", "Delete a value from persistent memory at the given scope and key."),
        ("signal", "Send a fire-and-forget signal to another workflow."),
        ("delegate", "Ask the orchestrator to dispatch another agent with the given input."),
        ("log", "Emit a structured log/trace event."),
        ("custom", "Emit a custom, implementation-defined effect."),
    ]
    .into_iter()
    .map(|(name, description)| ToolSchema {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: generic.clone(),
    })
    .collect()
}

/// Deep optional capability: consulted once per iteration if present.
/// Absence always passes — an agent with no resource monitor configured
/// never blocks on this check.
pub trait ResourceMonitor: Send + Sync {
    /// Return `Err` with a human-readable reason if the local environment
    /// (disk, memory, open file handles, ...) cannot sustain another
    /// iteration right now.
    fn check(&self) -> Result<(), String>;
}

/// Ties a provider, a tool executor, a hook pipeline, and the budget
/// engine together into one [`Turn`] implementation.
///
/// Per-run state (message history, budget usage, loop-detection windows)
/// lives entirely inside [`Turn::execute`]'s local variables — `self` is
/// immutable configuration shared across many concurrent turns.
pub struct ExecutionLoop<P: Provider> {
    provider: P,
    tools: ToolExecutor,
    hooks: HookRegistry,
    context_config: ContextConfig,
    config: LoopConfig,
    cancellation: CancellationToken,
    resource_monitor: Option<Arc<dyn ResourceMonitor>>,
    trace: Arc<dyn TraceSink>,
}

impl<P: Provider> ExecutionLoop<P> {
    /// Build an execution loop from its components. Trace events go to a
    /// [`TracingSink`] until [`with_trace_sink`](Self::with_trace_sink)
    /// attaches something else.
    pub fn new(
        provider: P,
        tools: ToolExecutor,
        hooks: HookRegistry,
        context_config: ContextConfig,
        config: LoopConfig,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            provider,
            tools,
            hooks,
            context_config,
            config,
            cancellation,
            resource_monitor: None,
            trace: Arc::new(TracingSink),
        }
    }

    /// Attach a resource monitor consulted once per iteration.
    #[must_use]
    pub fn with_resource_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.resource_monitor = Some(monitor);
        self
    }

    /// Attach a trace sink. Replaces the default [`TracingSink`].
    #[must_use]
    pub fn with_trace_sink(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = trace;
        self
    }

    fn push_system_note(messages: &mut Vec<ProviderMessage>, text: impl Into<String>) {
        messages.push(ProviderMessage::new(Role::System, vec![ContentPart::Text { text: text.into() }]));
    }

    fn push_user_note(messages: &mut Vec<ProviderMessage>, text: impl Into<String>) {
        messages.push(ProviderMessage::new(Role::User, vec![ContentPart::Text { text: text.into() }]));
    }

    fn final_text(messages: &[ProviderMessage]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| {
                m.content
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl<P: Provider + Send + Sync> Turn for ExecutionLoop<P> {
    async fn execute(&self, input: TurnInput) -> Result<TurnOutput, TurnError> {
        let started = Instant::now();
        let turn_config = input.config.clone().unwrap_or_default();

        let mut limits = self.config.budget.clone();
        if let Some(max_turns) = turn_config.max_turns {
            limits.max_iterations = Some(max_turns);
        }
        if let Some(max_cost) = turn_config.max_cost {
            limits.max_cost = Some(max_cost);
        }
        if let Some(max_duration) = turn_config.max_duration {
            limits.max_duration_ms = Some(max_duration.as_millis());
        }

        let mut budget = BudgetEngine::new(limits, self.config.loop_detection.clone(), 0);
        let strategy = ReversibleCompaction::new(self.context_config.clone());

        let task_text = input.message.as_text().unwrap_or("(non-text task)").to_string();
        let recitation_text = format!("Reminder of the active task: {task_text}");

        let system_prompt = match &turn_config.system_addendum {
            Some(addendum) if !addendum.is_empty() => format!("{}\n\n{addendum}", self.config.system_prompt),
            _ => self.config.system_prompt.clone(),
        };

        let model = turn_config.model.clone().or_else(|| self.config.model.clone());
        let mut tools: Vec<ToolSchema> = self
            .tools
            .registry()
            .iter()
            .filter(|t| match &turn_config.allowed_tools {
                Some(allowed) => allowed.iter().any(|name| name == t.name()),
                None => true,
            })
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        tools.extend(effect_tool_schemas());

        let mut messages = vec![content_to_user_message(&input.message)];
        let mut effects: Vec<Effect> = Vec::new();
        let mut total_tokens_in = 0u64;
        let mut total_tokens_out = 0u64;
        let mut tools_called: Vec<ToolCallRecord> = Vec::new();
        let mut future_intent_strikes = 0u32;
        let holder = self.config.agent_id.clone();

        let wrapup_window = turn_config.wrapup_window.unwrap_or(self.config.wrapup_window);
        let mut wrapup_fired = false;

        let session_id = input
            .session
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| holder.clone());
        let mut iteration: u32 = 0;

        let mut plan_manager = PlanManager::new();
        if self.config.plan_mode {
            plan_manager.start_plan(task_text.clone());
        }

        let exit_reason = loop {
            if self.cancellation.is_cancelled() {
                break ExitReason::ObserverHalt {
                    reason: "cancelled".to_string(),
                };
            }

            if let Some(monitor) = &self.resource_monitor {
                if let Err(reason) = monitor.check() {
                    break ExitReason::ObserverHalt { reason };
                }
            }

            let status = budget.check_budget();
            if !status.can_continue {
                break ExitReason::BudgetExhausted;
            }
            let mut force_text_only = status.force_text_only;

            iteration += 1;
            self.trace.record(
                TraceEvent::new("iteration.start", serde_json::Value::Null, session_id.clone(), epoch_millis())
                    .with_iteration(iteration),
            );

            if !wrapup_fired {
                if let Some(max_duration) = turn_config.max_duration {
                    let elapsed = DurationMs::from(started.elapsed());
                    if wrapup_window.as_millis() < max_duration.as_millis()
                        && elapsed.as_millis() + wrapup_window.as_millis() >= max_duration.as_millis()
                    {
                        wrapup_fired = true;
                        force_text_only = true;
                        Self::push_system_note(&mut messages, WRAPUP_PROMPT);
                    }
                }
            }

            if status.force_text_only {
                budget.mark_compacted();
                let before = strategy.token_estimate(&messages);
                messages = strategy.compact(messages);
                let after = strategy.token_estimate(&messages);
                if before > 0 && (after as f64) < before as f64 * 0.8 {
                    Self::push_system_note(&mut messages, "Context was compacted to recover budget. Continue.");
                } else {
                    break ExitReason::BudgetExhausted;
                }
            }
            if let Some(prompt) = status.injected_prompt {
                Self::push_user_note(&mut messages, prompt);
            }

            if strategy.should_compact(&messages, self.context_config.compaction_token_limit()) {
                messages = strategy.compact(messages);
            }
            messages = recite(messages, &recitation_text);
            messages = compact_tool_outputs(messages, &self.context_config);

            let preflight_hook = HookContext::new(HookPoint::PreInference);
            if let HookAction::Halt { reason } = self.hooks.dispatch(&preflight_hook).await {
                break ExitReason::ObserverHalt { reason };
            }

            let estimated = strategy.token_estimate(&messages);
            if estimated >= self.context_config.context_window_tokens {
                force_text_only = true;
                Self::push_system_note(&mut messages, "This is your final turn. Provide your answer now.");
            }

            let request = ProviderRequest {
                model: model.clone(),
                messages: messages.clone(),
                tools: if force_text_only { Vec::new() } else { tools.clone() },
                max_tokens: self.config.max_tokens,
                temperature: None,
                system: Some(system_prompt.clone()),
                extra: serde_json::Value::Null,
            };

            let completion = call_with_resilience(&self.provider, request, &self.config.resilience)
                .await
                .map_err(|e| TurnError::Provider(e.to_string()))?;

            total_tokens_in += completion.total_usage.input_tokens;
            total_tokens_out += completion.total_usage.output_tokens;
            budget.record_llm_usage(
                completion.total_usage.input_tokens,
                completion.total_usage.output_tokens,
                completion.response.cost.unwrap_or_default(),
            );

            let post_status = budget.check_budget();
            if !post_status.can_continue {
                break ExitReason::BudgetExhausted;
            }

            let response = completion.response;
            let assistant_message = ProviderMessage::new(Role::Assistant, response.content.clone());
            messages.push(assistant_message);

            let post_hook = HookContext::new(HookPoint::PostInference);
            if let HookAction::Halt { reason } = self.hooks.dispatch(&post_hook).await {
                break ExitReason::ObserverHalt { reason };
            }

            let requested_calls: Vec<(String, String, serde_json::Value)> = response
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolUse { id, name, input } => Some((id.clone(), name.clone(), input.clone())),
                    _ => None,
                })
                .collect();

            let text = response
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("");

            if requested_calls.is_empty() || force_text_only {
                if looks_like_future_intent(&text) {
                    if future_intent_strikes < 2 {
                        future_intent_strikes += 1;
                        Self::push_user_note(
                            &mut messages,
                            "You described future work instead of doing it or finishing. Either call a tool now or give your final answer.",
                        );
                        continue;
                    }
                    return Err(TurnError::IncompleteAction);
                }
                break ExitReason::Complete;
            }

            let mut effect_calls = Vec::new();
            let mut tool_calls = Vec::new();
            for (id, name, input) in requested_calls {
                match try_as_effect(&name, &input) {
                    Some(Ok(effect)) => effect_calls.push((id, effect)),
                    Some(Err(_)) | None => tool_calls.push(ToolCall { id, name, input }),
                }
            }

            let mut result_parts = Vec::new();
            for (id, effect) in effect_calls {
                effects.push(effect);
                result_parts.push(ContentPart::ToolResult {
                    tool_use_id: id,
                    content: "acknowledged".to_string(),
                    is_error: false,
                });
            }

            if self.config.plan_mode {
                let reason = if text.trim().is_empty() {
                    "proposed during plan mode".to_string()
                } else {
                    text.trim().to_string()
                };
                let mut remaining = Vec::with_capacity(tool_calls.len());
                for call in tool_calls {
                    let is_write_call = self
                        .tools
                        .registry()
                        .get(&call.name)
                        .map(|t| is_write(t.kind()))
                        .unwrap_or(false);
                    if !is_write_call {
                        remaining.push(call);
                        continue;
                    }
                    let description = format!("{}: {reason}", call.name);
                    let queued = plan_manager
                        .add_proposed_change(call.name.clone(), call.input.clone(), reason.clone(), None)
                        .is_ok();
                    if queued {
                        effects.push(Effect::Custom {
                            effect_type: "proposed_change".to_string(),
                            data: serde_json::json!({
                                "tool": call.name,
                                "args": call.input,
                                "description": description,
                            }),
                        });
                    }
                    result_parts.push(ContentPart::ToolResult {
                        tool_use_id: call.id,
                        content: format!("change queued to plan, not executed: {description}"),
                        is_error: false,
                    });
                }
                tool_calls = remaining;
            }

            if !tool_calls.is_empty() {
                for call in &tool_calls {
                    let mut pre_hook = HookContext::new(HookPoint::PreToolUse);
                    pre_hook.tool_name = Some(call.name.clone());
                    pre_hook.tool_input = Some(call.input.clone());
                    let _ = self.hooks.dispatch(&pre_hook).await;
                }

                for call in &tool_calls {
                    self.trace.record(
                        TraceEvent::new(
                            "tool.start",
                            serde_json::json!({"tool": call.name}),
                            session_id.clone(),
                            epoch_millis(),
                        )
                        .with_iteration(iteration),
                    );
                }

                let call_start = Instant::now();
                let batch = self.tools.execute_batch(tool_calls.clone(), &holder).await;
                let elapsed = DurationMs::from(call_start.elapsed());

                for (call, outcome) in tool_calls.iter().zip(batch.outcomes.into_iter()) {
                    let succeeded = outcome.result.is_ok();
                    budget.record_tool_call(&call.name, &call.input, succeeded);
                    tools_called.push(ToolCallRecord::new(call.name.clone(), elapsed, succeeded));
                    self.trace.record(
                        TraceEvent::new(
                            "tool.end",
                            serde_json::json!({"tool": call.name, "succeeded": succeeded}),
                            session_id.clone(),
                            epoch_millis(),
                        )
                        .with_iteration(iteration),
                    );

                    let (content, is_error) = match outcome.result {
                        Ok(value) => (value.to_string(), false),
                        Err(err) => (err.to_string(), true),
                    };
                    let truncated = if content.len() > self.config.resilience.max_tool_output_chars {
                        format!(
                            "{}... ({} chars, truncated)",
                            &content[..self.config.resilience.max_tool_output_chars.min(content.len())],
                            content.len()
                        )
                    } else {
                        content
                    };

                    let mut post_hook = HookContext::new(HookPoint::PostToolUse);
                    post_hook.tool_name = Some(call.name.clone());
                    post_hook.tool_result = Some(truncated.clone());
                    let _ = self.hooks.dispatch(&post_hook).await;

                    result_parts.push(ContentPart::ToolResult {
                        tool_use_id: call.id.clone(),
                        content: truncated,
                        is_error,
                    });
                }
            }

            messages.push(ProviderMessage::new(Role::User, result_parts));

            let exit_hook = HookContext::new(HookPoint::ExitCheck);
            if let HookAction::Halt { reason } = self.hooks.dispatch(&exit_hook).await {
                break ExitReason::ObserverHalt { reason };
            }

            self.trace.record(
                TraceEvent::new("iteration.end", serde_json::Value::Null, session_id.clone(), epoch_millis())
                    .with_iteration(iteration),
            );
            tracing::debug!(iterations = budget.usage().own_iterations, "execution_loop.iteration");
        };

        let usage = budget.usage().clone();
        let mut metadata = TurnMetadata::default();
        metadata.tokens_in = total_tokens_in;
        metadata.tokens_out = total_tokens_out;
        metadata.cost = usage.cost;
        metadata.turns_used = usage.own_iterations;
        metadata.tools_called = tools_called;
        metadata.duration = DurationMs::from(started.elapsed());

        let final_content = Content::text(Self::final_text(&messages));

        let mut output = TurnOutput::new(final_content, exit_reason);
        output.metadata = metadata;
        output.effects = effects;
        Ok(output)
    }
}
