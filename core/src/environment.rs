//! Isolation and resource constraints a turn runs inside.

use crate::{
    error::EnvError,
    turn::{TurnInput, TurnOutput},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Mediates between a caller and the isolated context a turn actually
/// runs in. A dev-mode environment executes in-process with no
/// isolation at all; a hardened one spins up a container or microVM
/// per call and tears it down after.
///
/// `run()` takes only data (`TurnInput` + `EnvironmentSpec`) — never a
/// function pointer. Which `Turn` gets invoked and how is the
/// implementation's own concern; a direct-execution environment
/// typically holds it as an `Arc<dyn Turn>` set up at construction.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Execute a turn within this environment's isolation boundary.
    ///
    /// The implementation:
    /// 1. Provisions any required isolation (container, sandbox, etc.)
    /// 2. Applies resource limits
    /// 3. Executes the turn (mechanism is internal to the implementation)
    /// 4. Captures the output
    /// 5. Tears down the isolation context
    async fn run(&self, input: TurnInput, spec: &EnvironmentSpec) -> Result<TurnOutput, EnvError>;
}

/// Declarative specification for an execution environment.
/// This is serializable so it can live in config files (YAML, TOML).
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Isolation boundaries to apply, outermost first.
    #[serde(default)]
    pub isolation: Vec<IsolationBoundary>,

    /// Resource limits.
    pub resources: Option<ResourceLimits>,

    /// Network policy.
    pub network: Option<NetworkPolicy>,
}

/// A single isolation boundary. Multiple boundaries compose
/// (e.g., container + gVisor + network policy = defense in depth).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IsolationBoundary {
    /// OS process boundary.
    Process,
    /// Container (Docker, containerd, etc.).
    Container {
        /// Optional container image to use.
        image: Option<String>,
    },
    /// Syscall interception (gVisor runsc).
    Gvisor,
    /// Hardware-enforced VM (Kata Containers).
    MicroVm,
    /// WebAssembly sandbox.
    Wasm {
        /// Optional Wasm runtime to use.
        runtime: Option<String>,
    },
    /// Network-level isolation.
    NetworkPolicy {
        /// Network rules to apply.
        rules: Vec<NetworkRule>,
    },
    /// Future isolation types.
    Custom {
        /// The custom boundary type identifier.
        boundary_type: String,
        /// Configuration for this boundary.
        config: serde_json::Value,
    },
}

/// Resource limits for the execution environment.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU limit, e.g. "1.0", "500m".
    pub cpu: Option<String>,
    /// Memory limit, e.g. "2Gi", "512Mi".
    pub memory: Option<String>,
    /// Disk limit, e.g. "10Gi".
    pub disk: Option<String>,
    /// Maximum open file/process handles.
    pub max_handles: Option<u32>,
}

/// Network policy for the execution environment.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkPolicy {
    /// Default action for traffic not matching any rule.
    pub default: NetworkAction,
    /// Explicit rules.
    pub rules: Vec<NetworkRule>,
}

/// A single network rule.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRule {
    /// Domain or CIDR to match.
    pub destination: String,
    /// Port (optional, None = all ports).
    pub port: Option<u16>,
    /// Allow or deny.
    pub action: NetworkAction,
}

/// Network traffic action.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum NetworkAction {
    /// Allow the traffic.
    Allow,
    /// Deny the traffic.
    Deny,
}

impl NetworkPolicy {
    /// Create a new network policy.
    pub fn new(default: NetworkAction, rules: Vec<NetworkRule>) -> Self {
        Self { default, rules }
    }
}

impl NetworkRule {
    /// Create a new network rule.
    pub fn new(destination: impl Into<String>, action: NetworkAction) -> Self {
        Self {
            destination: destination.into(),
            port: None,
            action,
        }
    }
}
