//! Configuration surface for the execution loop and its budget engine.

use agentcore_proto::DurationMs;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Limits checked by the budget engine, at both a soft (~70%) and hard
/// (100%) threshold. `None` means that dimension is unconstrained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetLimits {
    /// Maximum combined input+output tokens for the run.
    pub max_tokens: Option<u64>,
    /// Maximum cost in USD for the run.
    pub max_cost: Option<Decimal>,
    /// Maximum wall-clock duration, excluding paused intervals.
    pub max_duration_ms: Option<u64>,
    /// Maximum total iterations (own + inherited from a parent spawn).
    pub max_iterations: Option<u32>,
    /// Iteration count the caller expects this task to take; used only
    /// for diagnostics, never enforced.
    pub target_iterations: Option<u32>,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_tokens: Some(200_000),
            max_cost: None,
            max_duration_ms: None,
            max_iterations: Some(50),
            target_iterations: None,
        }
    }
}

impl BudgetLimits {
    /// Fraction of each limit at which a soft-limit advisory fires.
    pub const SOFT_THRESHOLD: f64 = 0.70;
}

/// Defaults for doom-loop, exploration-saturation, and stuck detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDetectionConfig {
    /// Window size (most recent N tool calls) doom-loop detection scans.
    pub window: usize,
    /// Minimum repeat count within the window to call it a doom loop.
    pub repeat_threshold: usize,
    /// Unique file reads before exploration is considered saturated.
    pub exploration_read_threshold: usize,
    /// Iterations without a progress signal before stuck detection fires.
    pub stuck_after_iterations: u32,
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            window: 6,
            repeat_threshold: 3,
            exploration_read_threshold: 8,
            stuck_after_iterations: 5,
        }
    }
}

/// Resilience ladder defaults for LLM call wrapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Retries for an empty (no text, no tool calls) response.
    pub max_empty_retries: u32,
    /// Continuation turns after a `max_tokens` stop with no tool calls.
    pub max_continuations: u32,
    /// Per-tool-result truncation length in characters.
    pub max_tool_output_chars: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_empty_retries: 2,
            max_continuations: 3,
            max_tool_output_chars: 8 * 1024,
        }
    }
}

/// Top-level configuration for one execution loop run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Base system prompt. Context assembly may append addenda.
    pub system_prompt: String,
    /// Model override, if the caller wants a non-default model.
    pub model: Option<String>,
    /// Maximum output tokens requested per provider call.
    pub max_tokens: Option<u32>,
    /// Budget limits for this run.
    pub budget: BudgetLimits,
    /// Loop-detection thresholds.
    pub loop_detection: LoopDetectionConfig,
    /// Resilience ladder configuration.
    pub resilience: ResilienceConfig,
    /// Identity used as the claim holder when executing tools.
    pub agent_id: String,
    /// How long before `max_duration` the loop should stop opening new
    /// tool calls and push the model toward a final answer, when a turn
    /// doesn't override it via `TurnConfig::wrapup_window`. Has no
    /// effect when `max_duration` is unset.
    pub wrapup_window: DurationMs,
    /// Whether tool calls classified as writes get queued as proposed
    /// changes instead of executed immediately.
    pub plan_mode: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            model: None,
            max_tokens: None,
            budget: BudgetLimits::default(),
            loop_detection: LoopDetectionConfig::default(),
            resilience: ResilienceConfig::default(),
            agent_id: "agent".to_string(),
            wrapup_window: DurationMs::from_secs(30),
            plan_mode: false,
        }
    }
}
