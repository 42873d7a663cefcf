#![deny(missing_docs)]
//! Hook registry and dispatch pipeline for the execution core.
//!
//! The [`HookRegistry`] collects multiple [`Hook`] implementations into
//! an ordered pipeline. At each hook point, hooks are dispatched in
//! registration order. The pipeline short-circuits on `Halt`, `SkipTool`,
//! `ModifyToolInput`, or `ModifyToolOutput` — subsequent hooks are not
//! called. Hook errors are logged via `tracing` and the pipeline
//! continues (errors don't halt).
//!
//! This is the gate the execution loop and tool executor both dispatch
//! through: `PreInference`/`PostInference` bracket each model call,
//! `PreToolUse`/`PostToolUse` bracket each tool call, and `ExitCheck`
//! fires at every loop-termination decision point.

use agentcore_proto::hook::{Hook, HookAction, HookContext, HookPoint};
use std::sync::Arc;

/// A registry that dispatches hook events to an ordered pipeline of hooks.
///
/// Hooks are called in the order they were registered. The pipeline
/// short-circuits on any action other than `Continue` (except errors,
/// which are logged and ignored).
pub struct HookRegistry {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookRegistry {
    /// Create a new empty hook registry.
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Add a hook to the end of the pipeline.
    pub fn add(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.push(hook);
    }

    /// Number of hooks registered, regardless of which points they fire at.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Dispatch a hook event through the pipeline.
    ///
    /// Returns the final action. If all hooks return `Continue`, the
    /// result is `Continue`. If any hook returns `Halt`, `SkipTool`,
    /// `ModifyToolInput`, or `ModifyToolOutput`, the pipeline stops and
    /// that action is returned. Hook errors are logged and treated as
    /// `Continue`.
    pub async fn dispatch(&self, ctx: &HookContext) -> HookAction {
        for hook in &self.hooks {
            if !hook.points().contains(&ctx.point) {
                continue;
            }

            match hook.on_event(ctx).await {
                Ok(HookAction::Continue) => continue,
                Ok(action @ HookAction::Halt { .. }) => {
                    tracing::warn!(point = ?ctx.point, ?action, "hook halted turn");
                    return action;
                }
                Ok(action) => {
                    tracing::debug!(point = ?ctx.point, ?action, "hook short-circuited pipeline");
                    return action;
                }
                Err(e) => {
                    tracing::warn!(point = ?ctx.point, error = %e, "hook error, continuing pipeline");
                    continue;
                }
            }
        }

        HookAction::Continue
    }

    /// Dispatch and fold the result into an owned [`HookContext`] the
    /// caller can further mutate (e.g. to inject a `ModifyToolInput`'s
    /// replacement value before the tool runs).
    ///
    /// This is a convenience for callers that already have a context by
    /// value; the dispatch itself is identical to [`HookRegistry::dispatch`].
    pub async fn dispatch_owned(&self, ctx: HookContext) -> (HookContext, HookAction) {
        let action = self.dispatch(&ctx).await;
        (ctx, action)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
