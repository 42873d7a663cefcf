//! Content carried across the Turn boundary: task input and agent output.
//!
//! This is deliberately not the same type as the provider-facing message
//! history context assembly builds — that lives closer to the model call
//! and knows about roles and cache hints. `Content` is what a caller hands
//! to [`Turn::execute`](crate::turn::Turn::execute) and what comes back:
//! a task description in, a final answer (plus any tool activity worth
//! surfacing) out.

use serde::{Deserialize, Serialize};

/// Content crossing a turn boundary. Most callers only ever need plain
/// text; anything richer — an attached screenshot, a tool exchange the
/// caller wants visibility into — upgrades to [`Blocks`](Content::Blocks).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Content {
    /// Plain text.
    Text(String),
    /// Structured blocks, for anything text alone can't express.
    Blocks(Vec<ContentBlock>),
}

/// One block within [`Content::Blocks`].
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    /// A run of plain text.
    #[serde(rename = "text")]
    Text {
        /// The text.
        text: String,
    },

    /// An embedded image, e.g. a screenshot attached to a task.
    #[serde(rename = "image")]
    Image {
        /// Where the image bytes come from.
        source: ImageSource,
        /// MIME type of the image data.
        media_type: String,
    },

    /// A model-issued request to invoke a tool.
    #[serde(rename = "tool_use")]
    ToolUse {
        /// Correlates this request with its eventual `ToolResult`.
        id: String,
        /// Name of the tool being invoked.
        name: String,
        /// Tool call arguments.
        input: serde_json::Value,
    },

    /// The outcome of running a tool, matched back to its `ToolUse` by id.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// The `id` of the `ToolUse` this answers.
        tool_use_id: String,
        /// The tool's output, already rendered to text.
        content: String,
        /// True if the tool call failed; `content` then holds the error.
        is_error: bool,
    },

    /// Anything that doesn't fit the named variants yet. New content
    /// kinds land here first and graduate to a named variant once their
    /// shape settles.
    #[serde(rename = "custom")]
    Custom {
        /// What kind of custom content this is.
        content_type: String,
        /// The payload, shaped however `content_type` dictates.
        data: serde_json::Value,
    },
}

/// Source for image content.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Base64-encoded image data.
    Base64 {
        /// The base64-encoded image data.
        data: String,
    },
    /// URL pointing to an image.
    Url {
        /// The URL of the image.
        url: String,
    },
}

impl Content {
    /// Build a plain-text content value.
    pub fn text(s: impl Into<String>) -> Self {
        Content::Text(s.into())
    }

    /// Pull out the first run of plain text, if any. For `Blocks`, this
    /// skips over tool calls, images, and anything else non-textual —
    /// callers that need the full structure should match on `Blocks`
    /// directly instead.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            Content::Blocks(blocks) => blocks.iter().find_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }
}
