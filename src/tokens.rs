//! Approximate token counting
//!
//! A fixed ~4 characters per token heuristic. It needs no tokenizer and is
//! deterministic; counts are approximate by construction.

use crate::types::Message;

/// Characters per token
pub const CHARS_PER_TOKEN: usize = 4;

/// Formatting overhead added for every message (role, delimiters)
pub const PER_MESSAGE_OVERHEAD: usize = 10;

/// Overhead for the conversation structure as a whole
pub const CONVERSATION_OVERHEAD: usize = 5;

/// Estimate the token count of a piece of text
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() / CHARS_PER_TOKEN).max(1)
}

/// Cost of one message inside a conversation, excluding the conversation overhead
pub fn estimate_message_tokens(message: &Message) -> usize {
    estimate_tokens(message.role.as_str()) + estimate_tokens(&message.content) + PER_MESSAGE_OVERHEAD
}

/// Estimate the token count of a message list
pub fn estimate_tokens_for_messages(messages: &[Message]) -> usize {
    if messages.is_empty() {
        return 0;
    }
    messages.iter().map(estimate_message_tokens).sum::<usize>() + CONVERSATION_OVERHEAD
}

/// Token cost of each message individually
pub fn tokens_per_message(messages: &[Message]) -> Vec<usize> {
    messages.iter().map(estimate_message_tokens).collect()
}

/// Cut text so it roughly fits `max_tokens`, marking the cut with `...`
pub fn truncate_text_to_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }

    let max_chars = max_tokens * CHARS_PER_TOKEN;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}
