#![deny(missing_docs)]
//! Tool interface, registry, and policy-gated execution pipeline.
//!
//! Defines the [`ToolDyn`] trait for object-safe tool abstraction and
//! [`ToolRegistry`] for managing collections of tools. Any tool source
//! (local function, MCP server, HTTP endpoint) implements [`ToolDyn`].
//! [`ToolExecutor`] wraps registry lookups with policy evaluation, safety
//! checks, file claims, and parallel batching of read-only calls.

mod claims;
mod executor;
mod policy;
mod safety;

pub use claims::{ClaimConflict, ClaimStore, InMemoryClaimStore};
pub use executor::{BatchOutcome, ToolCall, ToolExecutor, ToolOutcome};
pub use policy::{AllowAll, PolicyDecision, PolicyEngine};
pub use safety::{AllowList, SafetyDecision, SafetyGate};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Errors from tool operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool was not found in the registry.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Tool execution failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The input provided to the tool was invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Policy evaluation forbade this call.
    #[error("forbidden by policy: {0}")]
    PolicyForbidden(String),

    /// Safety gate rejected this call.
    #[error("rejected by safety gate: {0}")]
    SafetyRejected(String),

    /// Target path is claimed by another agent.
    #[error("path claimed by {holder}: {path}")]
    PathClaimed {
        /// The claimed path.
        path: String,
        /// Identifier of the agent holding the claim.
        holder: String,
    },

    /// Execution exceeded its per-tool timeout.
    #[error("tool call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Write sensitivity of a tool, used for plan-mode interception, policy
/// evaluation, and batch-parallelism eligibility. The tool registry is the
/// single source of truth for this — callers never hardcode tool-name lists.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Read-only: no observable side effects outside the call itself.
    /// Eligible for parallel batching with other `ReadOnly` calls.
    ReadOnly,
    /// Mutates state (writes/edits a file, spawns a subagent with write
    /// intent). Requires a file claim and runs outside any batch.
    Write,
    /// Irreversible or high-blast-radius (delete, destructive shell).
    /// Always intercepted in plan mode, never batched.
    Destructive,
}

/// Whether a tool of the given kind counts as a write for plan-mode
/// interception and policy purposes.
pub fn is_write(kind: ToolKind) -> bool {
    matches!(kind, ToolKind::Write | ToolKind::Destructive)
}

/// Whether a tool of the given kind is eligible for parallel batching.
pub fn is_parallelizable(kind: ToolKind) -> bool {
    matches!(kind, ToolKind::ReadOnly)
}

/// Object-safe trait for tool implementations.
///
/// Any tool source (local function, MCP server, HTTP endpoint) implements
/// this trait. Tools are stored as `Arc<dyn ToolDyn>` in [`ToolRegistry`].
pub trait ToolDyn: Send + Sync {
    /// The tool's unique name.
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// This tool's write classification.
    fn kind(&self) -> ToolKind;

    /// Execute the tool with the given input.
    fn call(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>>;
}

/// Registry of tools available to a turn.
///
/// Holds tools as `Arc<dyn ToolDyn>` keyed by name. The execution loop uses
/// this to look up and execute tools requested by the model.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolDyn>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn ToolDyn>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolDyn>> {
        self.tools.get(name)
    }

    /// Iterate over all registered tools.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ToolDyn>> {
        self.tools.values()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn tool_dyn_is_object_safe() {
        _assert_send_sync::<Arc<dyn ToolDyn>>();
    }

    #[test]
    fn tool_error_display() {
        assert_eq!(
            ToolError::NotFound("bash".into()).to_string(),
            "tool not found: bash"
        );
        assert_eq!(
            ToolError::ExecutionFailed("timeout".into()).to_string(),
            "execution failed: timeout"
        );
        assert_eq!(
            ToolError::InvalidInput("missing field".into()).to_string(),
            "invalid input: missing field"
        );
    }

    #[test]
    fn write_classification_follows_kind_not_name() {
        assert!(!is_write(ToolKind::ReadOnly));
        assert!(is_write(ToolKind::Write));
        assert!(is_write(ToolKind::Destructive));
    }

    #[test]
    fn only_read_only_is_parallelizable() {
        assert!(is_parallelizable(ToolKind::ReadOnly));
        assert!(!is_parallelizable(ToolKind::Write));
        assert!(!is_parallelizable(ToolKind::Destructive));
    }

    pub(crate) struct EchoTool;

    impl ToolDyn for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input back"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn kind(&self) -> ToolKind {
            ToolKind::ReadOnly
        }
        fn call(
            &self,
            input: serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>>
        {
            Box::pin(async move { Ok(json!({"echoed": input})) })
        }
    }

    pub(crate) struct FailTool;

    impl ToolDyn for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn kind(&self) -> ToolKind {
            ToolKind::Write
        }
        fn call(
            &self,
            _input: serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>>
        {
            Box::pin(async { Err(ToolError::ExecutionFailed("always fails".into())) })
        }
    }

    #[test]
    fn registry_add_and_get() {
        let mut reg = ToolRegistry::new();
        assert!(reg.is_empty());

        reg.register(Arc::new(EchoTool));
        assert_eq!(reg.len(), 1);
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nonexistent").is_none());
    }

    #[test]
    fn registry_iter() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        reg.register(Arc::new(FailTool));

        let names: Vec<&str> = reg.iter().map(|t| t.name()).collect();
        assert!(names.contains(&"echo"));
        assert!(names.contains(&"fail"));
    }

    #[tokio::test]
    async fn registry_call_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));

        let tool = reg.get("echo").unwrap();
        let result = tool.call(json!({"msg": "hello"})).await.unwrap();
        assert_eq!(result, json!({"echoed": {"msg": "hello"}}));
    }

    #[tokio::test]
    async fn registry_call_failing_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FailTool));

        let tool = reg.get("fail").unwrap();
        let result = tool.call(json!({})).await;
        assert!(result.is_err());
    }

    #[test]
    fn registry_overwrite() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert_eq!(reg.len(), 1);

        reg.register(Arc::new(EchoTool));
        assert_eq!(reg.len(), 1);
    }
}
