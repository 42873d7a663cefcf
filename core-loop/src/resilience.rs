//! Resilience wrapping around a single logical LLM call.
//!
//! A "logical call" may involve several physical provider round-trips:
//! retrying an empty response, continuing past a `max_tokens` cutoff, or
//! recovering from a tool call truncated mid-argument. Callers only see
//! the final [`ResilientCompletion`] plus the total usage billed across
//! every round-trip so budget accounting stays accurate.

use crate::config::ResilienceConfig;
use core_context::provider::{Provider, ProviderError};
use core_context::types::{ContentPart, ProviderMessage, ProviderRequest, ProviderResponse, Role, StopReason, TokenUsage};

/// Result of a resilience-wrapped call.
#[derive(Debug, Clone)]
pub struct ResilientCompletion {
    /// The final, usable response. For a max-tokens continuation chain
    /// this has the concatenated text of every continuation turn.
    pub response: ProviderResponse,
    /// Usage summed across every physical round-trip this call made.
    pub total_usage: TokenUsage,
    /// Number of physical provider round-trips performed.
    pub attempts: u32,
}

/// Errors terminal to the current iteration. Retryable provider errors
/// are exhausted internally and only escape once the retry ladder runs out.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    /// The provider call failed in a way retries could not recover.
    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),
}

fn has_text(parts: &[ContentPart]) -> bool {
    parts
        .iter()
        .any(|p| matches!(p, ContentPart::Text { text } if !text.trim().is_empty()))
}

fn has_tool_use(parts: &[ContentPart]) -> bool {
    parts.iter().any(|p| matches!(p, ContentPart::ToolUse { .. }))
}

fn text_of(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

fn add_usage(total: &mut TokenUsage, delta: &TokenUsage) {
    total.input_tokens += delta.input_tokens;
    total.output_tokens += delta.output_tokens;
    total.cache_read_tokens = match (total.cache_read_tokens, delta.cache_read_tokens) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    };
    total.cache_creation_tokens = match (total.cache_creation_tokens, delta.cache_creation_tokens) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    };
}

fn push_user_text(request: &mut ProviderRequest, text: impl Into<String>) {
    request.messages.push(ProviderMessage::new(
        Role::User,
        vec![ContentPart::Text { text: text.into() }],
    ));
}

async fn call_with_retry<P: Provider>(
    provider: &P,
    request: &ProviderRequest,
    retries_left: &mut u32,
) -> Result<ProviderResponse, ResilienceError> {
    loop {
        match provider.complete(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(err) if err.is_retryable() && *retries_left > 0 => {
                *retries_left -= 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Run one logical call through the full resilience ladder.
pub async fn call_with_resilience<P: Provider>(
    provider: &P,
    mut request: ProviderRequest,
    config: &ResilienceConfig,
) -> Result<ResilientCompletion, ResilienceError> {
    let mut total_usage = TokenUsage::default();
    let mut attempts = 0u32;
    let mut retry_budget = config.max_empty_retries + config.max_continuations + 2;

    // Empty-response retry.
    let mut response = loop {
        attempts += 1;
        let resp = call_with_retry(provider, &request, &mut retry_budget).await?;
        add_usage(&mut total_usage, &resp.usage);

        if !has_text(&resp.content) && !has_tool_use(&resp.content) && retry_budget > 0 {
            retry_budget -= 1;
            push_user_text(
                &mut request,
                "Your response was empty. Please answer the question or call a tool.",
            );
            continue;
        }
        break resp;
    };

    // Max-tokens continuation: truncated with no tool calls means the
    // model ran out of room mid-answer; push the partial text back and
    // ask it to continue, concatenating each turn's text.
    if response.stop_reason == StopReason::MaxTokens && !has_tool_use(&response.content) {
        let mut accumulated_text = text_of(&response.content);
        let mut continuations = 0u32;

        while response.stop_reason == StopReason::MaxTokens
            && !has_tool_use(&response.content)
            && continuations < config.max_continuations
        {
            continuations += 1;
            request.messages.push(ProviderMessage::new(
                Role::Assistant,
                vec![ContentPart::Text {
                    text: accumulated_text.clone(),
                }],
            ));
            push_user_text(&mut request, "Continue from exactly where you left off.");

            attempts += 1;
            response = call_with_retry(provider, &request, &mut retry_budget).await?;
            add_usage(&mut total_usage, &response.usage);
            accumulated_text.push_str(&text_of(&response.content));
        }

        response.content = vec![ContentPart::Text {
            text: accumulated_text,
        }];
    }

    // Truncated tool call recovery: truncation alongside tool calls means
    // at least one call's arguments may be malformed; the caller can't
    // trust them, so ask for a smaller batch of output instead of
    // executing possibly-garbage arguments.
    if response.stop_reason == StopReason::MaxTokens && has_tool_use(&response.content) {
        response.content.retain(|p| !matches!(p, ContentPart::ToolUse { .. }));
        push_user_text(
            &mut request,
            "Your previous response was truncated while making a tool call. \
             Make fewer tool calls per turn, or produce shorter arguments.",
        );
        attempts += 1;
        let recovered = call_with_retry(provider, &request, &mut retry_budget).await?;
        add_usage(&mut total_usage, &recovered.usage);
        response = recovered;
    }

    Ok(ResilientCompletion {
        response,
        total_usage,
        attempts,
    })
}
