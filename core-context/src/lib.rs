#![deny(missing_docs)]
//! Provider boundary, wire types, and context engineering.
//!
//! This crate sits between `agentcore_proto::turn::Turn` implementations
//! and LLM backends. It defines the [`Provider`] trait backends implement,
//! the internal [`types`] used to talk to them, conversions to and from
//! the protocol's `Content` types, and the context-engineering pipeline
//! (cache-aware assembly, recitation, reversible compaction) that keeps
//! a long-running conversation inside a model's context window.
//!
//! Key traits defined here:
//! - [`Provider`] — LLM provider interface (not object-safe, uses RPITIT)
//! - [`ContextStrategy`] — context window management

pub mod config;
pub mod context;
pub mod convert;
pub mod provider;
pub mod types;

// Re-exports
pub use config::ContextConfig;
pub use context::{compact_tool_outputs, recite, ContextStrategy, NoCompaction, ReversibleCompaction};
pub use convert::{
    content_block_to_part, content_part_to_block, content_to_parts, content_to_user_message,
    parts_to_content,
};
pub use provider::{Provider, ProviderError};
pub use types::*;
