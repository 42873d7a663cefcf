//! The execution backend a plan approval delegates to.

use std::future::Future;

/// A change failed to execute. Deliberately minimal and local to this
/// crate — `core-plan` has no dependency on `core-tool`, so this is not
/// `core_tool::ToolError`; the execution-loop's own `ChangeExecutor`
/// impl is expected to fold a real `ToolError` into this at the boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ChangeError(pub String);

/// Executes one queued change. Modelled the same way as `Provider` in
/// `agentcore-proto`: a native `async fn` in a non-object-safe trait, so
/// `PlanManager::approve` stays generic over the backend instead of
/// pulling in a boxed-future dependency this crate doesn't otherwise need.
pub trait ChangeExecutor {
    /// Run `tool` with `args` and return its result value.
    fn execute(
        &self,
        tool: &str,
        args: serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, ChangeError>> + Send;
}
