#![deny(missing_docs)]
//! Shared in-process substrate for an agent hierarchy.
//!
//! A parent and its subagents share five things through this crate: a
//! [`Blackboard`] of findings and file claims, a content-addressed
//! [`FileCache`], a [`BudgetPool`] for allocating token budget to children,
//! a [`CancellationToken`] tree so external cancellation propagates
//! downward while still allowing a subagent's own timeout to fire locally,
//! and a [`TraceSink`] that every layer can append structured events to.

mod blackboard;
mod budget_pool;
mod cancellation;
mod file_cache;
mod trace;

pub use blackboard::{Blackboard, Claim, ClaimMode, Finding, FindingQuery};
pub use budget_pool::{BudgetPool, ChildBudget};
pub use cancellation::{
    wrap_up_channel, Cancelled, CancellationToken, WrapUpSignal, WrapUpTrigger,
};
pub use file_cache::{CacheKey, FileCache};
pub use trace::{TraceEvent, TraceSink, TracingSink};

/// Test helpers re-exported from [`trace`].
pub mod test_utils {
    pub use crate::trace::test_utils::RecordingSink;
}
