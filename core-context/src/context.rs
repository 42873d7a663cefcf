//! Context engineering: cache-aware assembly, recitation, and compaction.
//!
//! Provider-native truncation (e.g. OpenAI `truncation: auto`) is
//! invisible here — handled by the `Provider` impl internally. Everything
//! in this module operates on the client side, before a request ever
//! reaches a provider.

use crate::config::ContextConfig;
use crate::types::{ContentPart, ProviderMessage, Role};

/// Strategy for managing context window size.
///
/// Implementations: `NoCompaction` (passthrough), `ReversibleCompaction`
/// (summarise older messages, preserve reconstruction references).
pub trait ContextStrategy: Send + Sync {
    /// Estimate token count for a message list.
    fn token_estimate(&self, messages: &[ProviderMessage]) -> usize;

    /// Whether compaction should run given the current messages and limit.
    fn should_compact(&self, messages: &[ProviderMessage], limit: usize) -> bool;

    /// Compact the message list. Returns a shorter list.
    fn compact(&self, messages: Vec<ProviderMessage>) -> Vec<ProviderMessage>;
}

fn estimate_part_tokens(part: &ContentPart) -> usize {
    match part {
        ContentPart::Text { text } => text.len() / 4,
        ContentPart::ToolUse { input, .. } => input.to_string().len() / 4,
        ContentPart::ToolResult { content, .. } => content.len() / 4,
        ContentPart::Image { .. } => 1000,
    }
}

fn estimate_message_tokens(messages: &[ProviderMessage]) -> usize {
    messages
        .iter()
        .flat_map(|m| &m.content)
        .map(estimate_part_tokens)
        .sum()
}

/// A no-op context strategy that never compacts.
///
/// Useful for short conversations or when the provider handles
/// truncation natively.
pub struct NoCompaction;

impl ContextStrategy for NoCompaction {
    fn token_estimate(&self, messages: &[ProviderMessage]) -> usize {
        estimate_message_tokens(messages)
    }

    fn should_compact(&self, _messages: &[ProviderMessage], _limit: usize) -> bool {
        false
    }

    fn compact(&self, messages: Vec<ProviderMessage>) -> Vec<ProviderMessage> {
        messages
    }
}

/// Summarise older messages once the context crosses a warning
/// threshold, replacing them with a single synthetic summary message
/// plus a reconstruction prompt that lists what was dropped so the
/// model can re-ask for it.
///
/// Compaction is idempotent: running it again on an already-compacted
/// transcript is a no-op, detected via the `compacted` marker this
/// strategy stamps into the summary message's metadata.
pub struct ReversibleCompaction {
    config: ContextConfig,
}

impl ReversibleCompaction {
    /// Build a reversible-compaction strategy from the given config.
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Collect stable references (tool names, tool_use ids) out of the
    /// messages being dropped, so the reconstruction prompt can name them.
    fn collect_references(messages: &[ProviderMessage]) -> Vec<String> {
        let mut refs = Vec::new();
        for msg in messages {
            for part in &msg.content {
                match part {
                    ContentPart::ToolUse { id, name, .. } => {
                        refs.push(format!("{name} ({id})"));
                    }
                    ContentPart::ToolResult { tool_use_id, .. } => {
                        refs.push(format!("result for {tool_use_id}"));
                    }
                    _ => {}
                }
            }
        }
        refs
    }
}

impl ContextStrategy for ReversibleCompaction {
    fn token_estimate(&self, messages: &[ProviderMessage]) -> usize {
        estimate_message_tokens(messages)
    }

    fn should_compact(&self, messages: &[ProviderMessage], limit: usize) -> bool {
        if messages.last().is_some_and(ProviderMessage::is_compacted_marker) {
            return false;
        }
        self.token_estimate(messages) >= limit
    }

    fn compact(&self, messages: Vec<ProviderMessage>) -> Vec<ProviderMessage> {
        // Idempotent: a transcript whose most recent message is already
        // a compaction marker is left untouched.
        if messages.last().is_some_and(ProviderMessage::is_compacted_marker) {
            return messages;
        }

        let keep_tail = self.config.max_preserved_results.max(2);
        if messages.len() <= keep_tail {
            return messages;
        }

        let split = messages.len() - keep_tail;
        let (older, tail) = messages.split_at(split);

        let preserved: Vec<&ProviderMessage> = older
            .iter()
            .filter(|m| m.preserve_from_compaction())
            .collect();
        let references = Self::collect_references(older);

        let mut summary_text = format!(
            "[context reduced] Summarised {} earlier message(s).",
            older.len()
        );
        if !references.is_empty() {
            summary_text.push_str("\nReferences you can re-request if needed: ");
            summary_text.push_str(&references.join(", "));
        }

        let mut summary = ProviderMessage::new(
            Role::System,
            vec![ContentPart::Text { text: summary_text }],
        );
        summary.metadata = Some(serde_json::json!({"compacted": true}));

        let mut result = Vec::with_capacity(1 + preserved.len() + tail.len());
        result.push(summary);
        result.extend(preserved.into_iter().cloned());
        result.extend(tail.iter().cloned());
        result
    }
}

/// Re-inject a compact restatement of the goal/plan/active-files before
/// the newest user message, combatting "lost-in-the-middle" degradation
/// in long transcripts.
///
/// This always replaces the caller's working message sequence with the
/// returned one — there is no "did it actually change" branch. Calling
/// this when `recitation_text` is empty is a correct, if wasteful, no-op
/// (an empty block is still inserted) — callers gate on a threshold
/// before calling, not this function.
pub fn recite(messages: Vec<ProviderMessage>, recitation_text: &str) -> Vec<ProviderMessage> {
    let recitation = ProviderMessage::new(
        Role::User,
        vec![ContentPart::Text {
            text: recitation_text.to_string(),
        }],
    );

    let insert_at = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .unwrap_or(messages.len());

    let mut result = messages;
    result.insert(insert_at, recitation);
    result
}

/// Replace tool-result bodies longer than `2 * preview_chars` with a
/// short preview, except for results flagged `preserveFromCompaction`,
/// bounded to the most recent `max_preserved` such results.
pub fn compact_tool_outputs(
    messages: Vec<ProviderMessage>,
    config: &ContextConfig,
) -> Vec<ProviderMessage> {
    let threshold = config.preview_chars * 2;
    let mut preserved_budget = config.max_preserved_results;

    // Walk newest-first so the most recent preserved results win the budget.
    let mut preserved_flags = vec![false; messages.len()];
    for (i, msg) in messages.iter().enumerate().rev() {
        if msg.preserve_from_compaction() {
            if preserved_budget > 0 {
                preserved_flags[i] = true;
                preserved_budget -= 1;
            }
        }
    }

    messages
        .into_iter()
        .enumerate()
        .map(|(i, msg)| {
            if preserved_flags[i] {
                return msg;
            }
            let content = msg
                .content
                .into_iter()
                .map(|part| match part {
                    ContentPart::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } if content.len() > threshold => ContentPart::ToolResult {
                        tool_use_id,
                        content: format!(
                            "{}... ({} chars, compacted)",
                            &content[..config.preview_chars.min(content.len())],
                            content.len()
                        ),
                        is_error,
                    },
                    other => other,
                })
                .collect();
            ProviderMessage { content, ..msg }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(role: Role, text: &str) -> ProviderMessage {
        ProviderMessage::new(role, vec![ContentPart::Text { text: text.into() }])
    }

    #[test]
    fn no_compaction_never_compacts() {
        let strategy = NoCompaction;
        let messages = vec![text_message(Role::User, "hello")];

        assert!(!strategy.should_compact(&messages, 100));
        let compacted = strategy.compact(messages.clone());
        assert_eq!(compacted.len(), messages.len());
    }

    #[test]
    fn no_compaction_estimates_tokens() {
        let strategy = NoCompaction;
        let messages = vec![text_message(Role::User, &"a".repeat(400))];

        let estimate = strategy.token_estimate(&messages);
        assert_eq!(estimate, 100); // 400 chars / 4
    }

    #[test]
    fn reversible_compaction_summarises_older_messages() {
        let strategy = ReversibleCompaction::new(ContextConfig {
            max_preserved_results: 2,
            ..ContextConfig::default()
        });

        let messages: Vec<ProviderMessage> = (0..10)
            .map(|i| text_message(Role::User, &format!("message {i}")))
            .collect();

        let compacted = strategy.compact(messages);
        // 1 summary + 2 tail messages
        assert_eq!(compacted.len(), 3);
        assert!(compacted[0].is_compacted_marker());
    }

    #[test]
    fn reversible_compaction_is_idempotent() {
        let strategy = ReversibleCompaction::new(ContextConfig::default());
        let messages: Vec<ProviderMessage> = (0..10)
            .map(|i| text_message(Role::User, &format!("message {i}")))
            .collect();

        let once = strategy.compact(messages);
        let twice = strategy.compact(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn reversible_compaction_preserves_flagged_messages() {
        let strategy = ReversibleCompaction::new(ContextConfig {
            max_preserved_results: 2,
            ..ContextConfig::default()
        });

        let mut preserved = text_message(Role::Assistant, "expensive subagent result");
        preserved.metadata = Some(serde_json::json!({"preserveFromCompaction": true}));

        let mut messages = vec![preserved];
        for i in 0..10 {
            messages.push(text_message(Role::User, &format!("message {i}")));
        }

        let compacted = strategy.compact(messages);
        assert!(compacted
            .iter()
            .any(|m| m.content.iter().any(
                |p| matches!(p, ContentPart::Text { text } if text == "expensive subagent result")
            )));
    }

    #[test]
    fn recite_inserts_before_last_user_message() {
        let messages = vec![
            text_message(Role::System, "system prompt"),
            text_message(Role::User, "first question"),
            text_message(Role::Assistant, "first answer"),
            text_message(Role::User, "second question"),
        ];

        let recited = recite(messages, "goal: ship the feature");
        assert_eq!(recited.len(), 5);
        assert_eq!(recited[3].role, Role::User);
        assert!(recited[3]
            .content
            .iter()
            .any(|p| matches!(p, ContentPart::Text { text } if text.contains("goal"))));
        // original last user message still present, now pushed later
        assert!(recited[4]
            .content
            .iter()
            .any(|p| matches!(p, ContentPart::Text { text } if text == "second question")));
    }

    #[test]
    fn compact_tool_outputs_truncates_long_results() {
        let config = ContextConfig {
            preview_chars: 10,
            max_preserved_results: 0,
            ..ContextConfig::default()
        };
        let long_result = "x".repeat(100);
        let messages = vec![ProviderMessage::new(
            Role::User,
            vec![ContentPart::ToolResult {
                tool_use_id: "tu_1".into(),
                content: long_result.clone(),
                is_error: false,
            }],
        )];

        let compacted = compact_tool_outputs(messages, &config);
        match &compacted[0].content[0] {
            ContentPart::ToolResult { content, .. } => {
                assert!(content.contains("compacted"));
                assert!(content.len() < long_result.len());
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    #[test]
    fn compact_tool_outputs_respects_preserve_flag() {
        let config = ContextConfig {
            preview_chars: 10,
            max_preserved_results: 6,
            ..ContextConfig::default()
        };
        let long_result = "x".repeat(100);
        let mut msg = ProviderMessage::new(
            Role::User,
            vec![ContentPart::ToolResult {
                tool_use_id: "tu_1".into(),
                content: long_result.clone(),
                is_error: false,
            }],
        );
        msg.metadata = Some(serde_json::json!({"preserveFromCompaction": true}));

        let compacted = compact_tool_outputs(vec![msg], &config);
        match &compacted[0].content[0] {
            ContentPart::ToolResult { content, .. } => assert_eq!(content, &long_result),
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }
}
