//! Typed identifiers, so an agent ID and a session ID can't be swapped
//! by accident even though both are plain strings underneath.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wraps a `String` in a distinct type per ID kind. No UUID enforcement,
/// no format requirement — this crate doesn't care what an ID looks
/// like, only that an `AgentId` can never be passed where a `SessionId`
/// is expected.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap anything convertible to `String` as this ID kind.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(AgentId, "Unique identifier for an agent.");
typed_id!(SessionId, "Unique identifier for a conversation session.");
typed_id!(WorkflowId, "Unique identifier for a workflow execution.");
typed_id!(ScopeId, "Unique identifier for a state scope.");
