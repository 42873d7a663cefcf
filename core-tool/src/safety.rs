//! Sandbox-level safety validation: allow/deny lists and path containment.
//!
//! This runs after policy evaluation and cannot be overridden by an
//! approved prompt — it is the last gate before a call reaches the sandbox.

/// Outcome of a safety check.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    /// The call passes safety validation.
    Allowed,
    /// The call is rejected, with a reason.
    Rejected(String),
}

/// Validates a tool call against sandbox-level safety rules.
pub trait SafetyGate: Send + Sync {
    /// Check whether `tool_name` may run with `args`.
    fn check(&self, tool_name: &str, args: &serde_json::Value) -> SafetyDecision;
}

/// A safety gate built from an explicit allowed-tool-names list plus an
/// optional root directory that any `path`-bearing argument must stay
/// within.
pub struct AllowList {
    allowed_tools: Vec<String>,
    root: Option<std::path::PathBuf>,
}

impl AllowList {
    /// Allow only the named tools, with no path containment check.
    pub fn new(allowed_tools: Vec<String>) -> Self {
        Self {
            allowed_tools,
            root: None,
        }
    }

    /// Additionally require any `path` argument to resolve within `root`.
    pub fn with_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn path_is_contained(&self, args: &serde_json::Value) -> bool {
        let Some(root) = &self.root else {
            return true;
        };
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return true;
        };
        // Lexical containment check: no escape above `root` via `..`, and
        // not rooted elsewhere via an absolute path outside `root`.
        let candidate = std::path::Path::new(path);
        if candidate.is_absolute() {
            return candidate.starts_with(root);
        }
        !candidate
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    }
}

impl SafetyGate for AllowList {
    fn check(&self, tool_name: &str, args: &serde_json::Value) -> SafetyDecision {
        if !self.allowed_tools.iter().any(|t| t == tool_name) {
            return SafetyDecision::Rejected(format!("{tool_name} is not on the allowlist"));
        }
        if !self.path_is_contained(args) {
            return SafetyDecision::Rejected(format!(
                "{tool_name} argument path escapes the sandbox root"
            ));
        }
        SafetyDecision::Allowed
    }
}
