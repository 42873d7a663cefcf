//! Bidirectional conversion between protocol content types and internal types.

use crate::types::{ContentPart, ImageSource, ProviderMessage, Role};
use agentcore_proto::content::{Content, ContentBlock};

/// Convert a protocol `ContentBlock` to an internal `ContentPart`.
pub fn content_block_to_part(block: &ContentBlock) -> ContentPart {
    match block {
        ContentBlock::Text { text } => ContentPart::Text { text: text.clone() },
        ContentBlock::Image { source, media_type } => ContentPart::Image {
            source: image_source_to_internal(source),
            media_type: media_type.clone(),
        },
        ContentBlock::ToolUse { id, name, input } => ContentPart::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentPart::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
        ContentBlock::Custom { content_type, data } => {
            // Design decision: Custom blocks are JSON-stringified with a type prefix
            ContentPart::Text {
                text: format!(
                    "[custom:{}] {}",
                    content_type,
                    serde_json::to_string(data).unwrap_or_default()
                ),
            }
        }
        // Handle non_exhaustive future variants
        _ => ContentPart::Text {
            text: "[unknown content block]".into(),
        },
    }
}

/// Convert an internal `ContentPart` to a protocol `ContentBlock`.
pub fn content_part_to_block(part: &ContentPart) -> ContentBlock {
    match part {
        ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
        ContentPart::Image { source, media_type } => ContentBlock::Image {
            source: image_source_to_protocol(source),
            media_type: media_type.clone(),
        },
        ContentPart::ToolUse { id, name, input } => ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
    }
}

/// Convert protocol `Content` to a list of internal `ContentPart`s.
pub fn content_to_parts(content: &Content) -> Vec<ContentPart> {
    match content {
        Content::Text(text) => vec![ContentPart::Text { text: text.clone() }],
        Content::Blocks(blocks) => blocks.iter().map(content_block_to_part).collect(),
        // Handle non_exhaustive
        _ => vec![ContentPart::Text {
            text: "[unknown content]".into(),
        }],
    }
}

/// Convert internal `ContentPart`s to a protocol `Content`.
pub fn parts_to_content(parts: &[ContentPart]) -> Content {
    if parts.len() == 1 {
        if let ContentPart::Text { text } = &parts[0] {
            return Content::Text(text.clone());
        }
    }
    Content::Blocks(parts.iter().map(content_part_to_block).collect())
}

/// Convert protocol `Content` to an internal `ProviderMessage` with User role.
pub fn content_to_user_message(content: &Content) -> ProviderMessage {
    ProviderMessage::new(Role::User, content_to_parts(content))
}

fn image_source_to_internal(source: &agentcore_proto::content::ImageSource) -> ImageSource {
    match source {
        agentcore_proto::content::ImageSource::Base64 { data } => ImageSource::Base64 {
            data: data.clone(),
        },
        agentcore_proto::content::ImageSource::Url { url } => ImageSource::Url { url: url.clone() },
        // Handle non_exhaustive
        _ => ImageSource::Url {
            url: String::new(),
        },
    }
}

fn image_source_to_protocol(source: &ImageSource) -> agentcore_proto::content::ImageSource {
    match source {
        ImageSource::Base64 { data } => agentcore_proto::content::ImageSource::Base64 {
            data: data.clone(),
        },
        ImageSource::Url { url } => agentcore_proto::content::ImageSource::Url { url: url.clone() },
    }
}
