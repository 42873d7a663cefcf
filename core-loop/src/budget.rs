//! Budget accounting and loop detection ("economics").

use crate::config::{BudgetLimits, LoopDetectionConfig};
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// A clock that tracks elapsed wall-clock time but can be paused while
/// waiting on external I/O (approval prompts, subagent execution) without
/// that wait counting against the duration budget.
#[derive(Debug)]
pub struct PausableClock {
    accumulated: Duration,
    resumed_at: Option<Instant>,
}

impl PausableClock {
    /// Create a clock that starts running immediately.
    pub fn new() -> Self {
        Self {
            accumulated: Duration::ZERO,
            resumed_at: Some(Instant::now()),
        }
    }

    /// Total elapsed time, excluding any paused interval.
    pub fn elapsed(&self) -> Duration {
        match self.resumed_at {
            Some(at) => self.accumulated + at.elapsed(),
            None => self.accumulated,
        }
    }

    /// Pause the clock. A no-op if already paused.
    pub fn pause(&mut self) {
        if let Some(at) = self.resumed_at.take() {
            self.accumulated += at.elapsed();
        }
    }

    /// Resume the clock. A no-op if already running.
    pub fn resume(&mut self) {
        if self.resumed_at.is_none() {
            self.resumed_at = Some(Instant::now());
        }
    }

    /// Whether the clock is currently paused.
    pub fn is_paused(&self) -> bool {
        self.resumed_at.is_none()
    }
}

impl Default for PausableClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic usage counters for one run.
#[derive(Debug, Clone, Default)]
pub struct BudgetUsage {
    /// Combined input+output tokens consumed so far.
    pub tokens: u64,
    /// Cost accrued so far, in USD.
    pub cost: Decimal,
    /// Total iterations (own + parent offset at spawn).
    pub iterations: u32,
    /// Own iterations only, for local diagnostics.
    pub own_iterations: u32,
}

/// Which budget dimension a status/exceeded report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDimension {
    /// Token budget.
    Tokens,
    /// Cost budget.
    Cost,
    /// Wall-clock duration budget.
    Duration,
    /// Iteration-count budget.
    Iterations,
}

/// Outcome of [`BudgetEngine::check_budget`].
#[derive(Debug, Clone)]
pub struct BudgetStatus {
    /// Whether the loop may proceed to another iteration.
    pub can_continue: bool,
    /// Human-readable reason, set whenever `can_continue` is false or a
    /// soft limit fired.
    pub reason: Option<String>,
    /// A message to inject as a user turn (nudge, doom-loop break,
    /// exploration-saturation transition, stuck-detection nudge).
    pub injected_prompt: Option<String>,
    /// Whether the loop should stop calling tools and force a final
    /// text-only response.
    pub force_text_only: bool,
    /// Whether this status reflects a soft-limit crossing rather than a
    /// hard stop.
    pub is_soft_limit: bool,
    /// Which dimension triggered this status, if any.
    pub dimension: Option<BudgetDimension>,
}

impl BudgetStatus {
    fn ok() -> Self {
        Self {
            can_continue: true,
            reason: None,
            injected_prompt: None,
            force_text_only: false,
            is_soft_limit: false,
            dimension: None,
        }
    }
}

/// Canonicalise a tool call into a fingerprint used for doom-loop
/// detection: `(tool_name, canonical_args)` where `canonical_args` has
/// object keys sorted recursively so key-order differences don't defeat
/// deduplication.
pub fn fingerprint(tool_name: &str, args: &serde_json::Value) -> String {
    format!("{tool_name}:{}", canonicalize(args))
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{k:?}:{}", canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        serde_json::Value::String(s) => format!("{:?}", s.trim()),
        other => other.to_string(),
    }
}

/// Rolling state used for doom-loop, exploration-saturation, and stuck
/// detection. Every tool dispatch updates exactly one of these windows.
#[derive(Debug, Default)]
pub struct LoopDetector {
    recent_fingerprints: VecDeque<String>,
    files_read: HashSet<String>,
    has_modified: bool,
    iterations_since_progress: u32,
    exploration_nudged: bool,
}

impl LoopDetector {
    /// Record a tool call's outcome against the detection windows.
    pub fn record_tool_call(&mut self, name: &str, args: &serde_json::Value, succeeded: bool) {
        let fp = fingerprint(name, args);
        self.recent_fingerprints.push_back(fp);
        if self.recent_fingerprints.len() > 64 {
            self.recent_fingerprints.pop_front();
        }

        let is_read = matches!(name, "read_file" | "list_files" | "glob" | "grep" | "hash_file");
        let is_write = matches!(name, "write_file" | "edit_file" | "delete_file");

        if is_read {
            if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
                self.files_read.insert(path.to_string());
            }
        }
        if is_write && succeeded {
            self.has_modified = true;
        }

        if is_read || is_write {
            self.iterations_since_progress = 0;
        }
    }

    /// Record that an LLM response was produced, which also counts as
    /// progress for stuck detection.
    pub fn record_llm_progress(&mut self) {
        self.iterations_since_progress = 0;
    }

    /// Advance the stuck-detection counter by one iteration with no
    /// recorded progress signal.
    pub fn tick_without_progress(&mut self) {
        self.iterations_since_progress += 1;
    }

    /// Whether the same fingerprint has appeared at least `repeat_threshold`
    /// times within the last `window` calls.
    pub fn doom_loop(&self, config: &LoopDetectionConfig) -> Option<String> {
        let window: Vec<&String> = self
            .recent_fingerprints
            .iter()
            .rev()
            .take(config.window)
            .collect();
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for fp in &window {
            *counts.entry(fp.as_str()).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .find(|(_, count)| *count >= config.repeat_threshold)
            .map(|(fp, _)| fp.to_string())
    }

    /// Whether exploration has saturated: many unique file reads with no
    /// modification yet, and this hasn't already been flagged.
    pub fn exploration_saturated(&mut self, config: &LoopDetectionConfig) -> bool {
        if self.exploration_nudged || self.has_modified {
            return false;
        }
        if self.files_read.len() >= config.exploration_read_threshold {
            self.exploration_nudged = true;
            return true;
        }
        false
    }

    /// Whether no progress signal has been observed in the configured
    /// number of iterations.
    pub fn stuck(&self, config: &LoopDetectionConfig) -> bool {
        self.iterations_since_progress >= config.stuck_after_iterations
    }
}

/// Budget and loop-detection accounting for one execution-loop run.
pub struct BudgetEngine {
    limits: BudgetLimits,
    loop_config: LoopDetectionConfig,
    usage: BudgetUsage,
    clock: PausableClock,
    detector: LoopDetector,
    compacted_once: bool,
}

impl BudgetEngine {
    /// Create a new engine. `parent_iterations_at_spawn` seeds the total
    /// iteration counter so hierarchy-wide limits are enforced against the
    /// total, not just this agent's own iterations.
    pub fn new(
        limits: BudgetLimits,
        loop_config: LoopDetectionConfig,
        parent_iterations_at_spawn: u32,
    ) -> Self {
        Self {
            limits,
            loop_config,
            usage: BudgetUsage {
                iterations: parent_iterations_at_spawn,
                ..Default::default()
            },
            clock: PausableClock::new(),
            detector: LoopDetector::default(),
            compacted_once: false,
        }
    }

    /// Current usage snapshot.
    pub fn usage(&self) -> &BudgetUsage {
        &self.usage
    }

    /// Borrow the loop detector, for callers that need to inspect windows
    /// beyond what `check_budget` exposes (rare; mostly for tests).
    pub fn detector(&self) -> &LoopDetector {
        &self.detector
    }

    /// Record usage from a completed LLM call.
    pub fn record_llm_usage(&mut self, input_tokens: u64, output_tokens: u64, cost: Decimal) {
        self.usage.tokens += input_tokens + output_tokens;
        self.usage.cost += cost;
        self.usage.iterations += 1;
        self.usage.own_iterations += 1;
        self.detector.record_llm_progress();
    }

    /// Record the outcome of a dispatched tool call against the
    /// loop-detection windows.
    pub fn record_tool_call(&mut self, name: &str, args: &serde_json::Value, succeeded: bool) {
        self.detector.record_tool_call(name, args, succeeded);
    }

    /// Pause the duration meter (awaiting approval, a subagent, or other
    /// external I/O that shouldn't count against the wall-clock budget).
    pub fn pause_duration(&mut self) {
        self.clock.pause();
    }

    /// Resume the duration meter.
    pub fn resume_duration(&mut self) {
        self.clock.resume();
    }

    /// Grant additional budget mid-run (e.g. a human approved an
    /// extension). Only token and cost limits are extendable; iteration
    /// and duration limits are not widened this way.
    pub fn extend_budget(&mut self, extra_tokens: u64, extra_cost: Decimal) {
        if let Some(max_tokens) = self.limits.max_tokens.as_mut() {
            *max_tokens += extra_tokens;
        }
        if let Some(max_cost) = self.limits.max_cost.as_mut() {
            *max_cost += extra_cost;
        }
    }

    /// Reset usage counters for a fresh run while keeping configured
    /// limits. Does not reset loop-detection windows; callers that want a
    /// fully clean slate should build a new engine instead.
    pub fn reset(&mut self) {
        self.usage = BudgetUsage::default();
        self.clock = PausableClock::new();
        self.compacted_once = false;
    }

    fn ratio(used: f64, limit: Option<f64>) -> Option<f64> {
        limit.map(|l| if l <= 0.0 { 1.0 } else { used / l })
    }

    /// Evaluate budget and loop-detection state and decide whether the
    /// loop may continue. Hard limits (100%) that cannot be recovered by
    /// emergency compaction produce `can_continue = false`.
    pub fn check_budget(&mut self) -> BudgetStatus {
        let token_ratio = Self::ratio(
            self.usage.tokens as f64,
            self.limits.max_tokens.map(|v| v as f64),
        );
        let cost_ratio = self.limits.max_cost.map(|max| {
            if max.is_zero() {
                1.0
            } else {
                (self.usage.cost / max).to_string().parse::<f64>().unwrap_or(1.0)
            }
        });
        let duration_ratio = Self::ratio(
            self.clock.elapsed().as_millis() as f64,
            self.limits.max_duration_ms.map(|v| v as f64),
        );
        let iteration_ratio = Self::ratio(
            self.usage.iterations as f64,
            self.limits.max_iterations.map(|v| v as f64),
        );

        for (ratio, dimension) in [
            (token_ratio, BudgetDimension::Tokens),
            (cost_ratio, BudgetDimension::Cost),
            (duration_ratio, BudgetDimension::Duration),
            (iteration_ratio, BudgetDimension::Iterations),
        ] {
            let Some(ratio) = ratio else { continue };
            if ratio >= 1.0 {
                let can_recover = matches!(
                    dimension,
                    BudgetDimension::Tokens | BudgetDimension::Cost
                ) && !self.compacted_once;
                return BudgetStatus {
                    can_continue: can_recover,
                    reason: Some(format!("{dimension:?} exhausted at {:.1}%", ratio * 100.0)),
                    injected_prompt: None,
                    force_text_only: can_recover,
                    is_soft_limit: false,
                    dimension: Some(dimension),
                };
            }
        }

        for (ratio, dimension) in [
            (token_ratio, BudgetDimension::Tokens),
            (cost_ratio, BudgetDimension::Cost),
            (duration_ratio, BudgetDimension::Duration),
            (iteration_ratio, BudgetDimension::Iterations),
        ] {
            let Some(ratio) = ratio else { continue };
            if ratio >= BudgetLimits::SOFT_THRESHOLD {
                return BudgetStatus {
                    can_continue: true,
                    reason: Some(format!(
                        "{dimension:?} at {:.1}% of budget",
                        ratio * 100.0
                    )),
                    injected_prompt: Some(
                        "You are approaching your resource budget. Wrap up exploration and move toward a concrete answer.".into(),
                    ),
                    force_text_only: false,
                    is_soft_limit: true,
                    dimension: Some(dimension),
                };
            }
        }

        if let Some(fp) = self.detector.doom_loop(&self.loop_config) {
            return BudgetStatus {
                can_continue: true,
                reason: Some(format!("doom loop detected: {fp}")),
                injected_prompt: Some(format!(
                    "You have repeated the same tool call several times in a row ({fp}). \
                     Do not repeat it verbatim; try a different approach or report your findings."
                )),
                force_text_only: false,
                is_soft_limit: false,
                dimension: None,
            };
        }

        if self.detector.exploration_saturated(&self.loop_config) {
            return BudgetStatus {
                can_continue: true,
                reason: Some("exploration saturated".into()),
                injected_prompt: Some(
                    "You have read many files without making any changes. Either make a \
                     concrete edit now or provide your final answer."
                        .into(),
                ),
                force_text_only: false,
                is_soft_limit: false,
                dimension: None,
            };
        }

        if self.detector.stuck(&self.loop_config) {
            return BudgetStatus {
                can_continue: true,
                reason: Some("no progress detected".into()),
                injected_prompt: Some(
                    "No progress has been made in several iterations. Provide your best \
                     current answer or take a concrete next action."
                        .into(),
                ),
                force_text_only: false,
                is_soft_limit: false,
                dimension: None,
            };
        }

        self.detector.tick_without_progress();
        BudgetStatus::ok()
    }

    /// Mark that emergency compaction has been used for this run. Per
    /// design, compaction recovery is single-shot: a second hard
    /// exhaustion always terminates.
    pub fn mark_compacted(&mut self) {
        self.compacted_once = true;
    }

    /// Whether emergency compaction has already been used this run.
    pub fn has_compacted(&self) -> bool {
        self.compacted_once
    }
}
