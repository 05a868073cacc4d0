//! Token-budgeted context windows
//!
//! Keeps a conversation inside the model's context window by:
//! - Counting tokens in the history
//! - Dropping low-importance messages when over budget
//! - Always keeping system messages and the most recent turns
//! - Injecting retrieved memories into whatever budget remains

use crate::importance::{protected_indices, ImportanceCalculator};
use crate::tokens::{
    estimate_tokens, estimate_tokens_for_messages, tokens_per_message, CHARS_PER_TOKEN,
    CONVERSATION_OVERHEAD, PER_MESSAGE_OVERHEAD,
};
use crate::types::{MemoryRecord, Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header line of the injected memory block
pub const MEMORY_BLOCK_HEADER: &str = "## Relevant Context from Memory:";

/// Context window configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum tokens of the model's context window
    pub max_tokens: usize,
    /// Tokens reserved for the model's response
    pub buffer_tokens: usize,
    /// Number of most recent messages that are never pruned
    pub always_keep_recent: usize,
    /// Never prune system messages
    pub always_keep_system: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 180_000,
            buffer_tokens: 20_000,
            always_keep_recent: 10,
            always_keep_system: true,
        }
    }
}

impl ContextConfig {
    /// Budget available to the prompt
    pub fn effective_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.buffer_tokens)
    }
}

/// Builder for context config
pub struct ContextConfigBuilder {
    config: ContextConfig,
}

impl ContextConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ContextConfig::default(),
        }
    }

    pub fn max_tokens(mut self, tokens: usize) -> Self {
        self.config.max_tokens = tokens;
        self
    }

    pub fn buffer_tokens(mut self, tokens: usize) -> Self {
        self.config.buffer_tokens = tokens;
        self
    }

    pub fn always_keep_recent(mut self, count: usize) -> Self {
        self.config.always_keep_recent = count;
        self
    }

    pub fn always_keep_system(mut self, keep: bool) -> Self {
        self.config.always_keep_system = keep;
        self
    }

    pub fn build(self) -> ContextConfig {
        self.config
    }
}

impl Default for ContextConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Final, ordered message set for a model call
///
/// `total_tokens` can exceed the budget only when the protected messages
/// alone do; callers check it rather than expecting an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextWindow {
    pub messages: Vec<Message>,
    pub total_tokens: usize,
    pub pruned_count: usize,
    pub retrieved_memories: Vec<MemoryRecord>,
}

/// Token usage breakdown of a message list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub effective_max_tokens: usize,
    pub buffer_tokens: usize,
    pub available_tokens: usize,
    pub message_count: usize,
    pub per_message_tokens: Vec<usize>,
    pub needs_pruning: bool,
}

/// Context budget manager
///
/// Pure and synchronous; safe to share between any number of callers.
#[derive(Debug, Clone, Default)]
pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn effective_budget(&self) -> usize {
        self.config.effective_budget()
    }

    /// Whether the messages exceed the effective budget
    pub fn should_prune(&self, messages: &[Message]) -> bool {
        estimate_tokens_for_messages(messages) > self.effective_budget()
    }

    /// Build a budget-fitting window from history and optional memories
    pub fn prepare_context(
        &self,
        messages: &[Message],
        memories: Option<&[MemoryRecord]>,
    ) -> ContextWindow {
        self.prepare_context_at(messages, memories, Utc::now())
    }

    /// Same as [`prepare_context`](Self::prepare_context) with an explicit clock
    pub fn prepare_context_at(
        &self,
        messages: &[Message],
        memories: Option<&[MemoryRecord]>,
        now: DateTime<Utc>,
    ) -> ContextWindow {
        let (mut context, pruned_count) = if self.should_prune(messages) {
            self.prune_messages(messages, now)
        } else {
            (messages.to_vec(), 0)
        };

        let mut total_tokens = estimate_tokens_for_messages(&context);
        let mut retrieved_memories = Vec::new();

        if let Some(memories) = memories.filter(|m| !m.is_empty()) {
            if let Some((block, included)) =
                self.format_memories(memories, total_tokens, context.is_empty(), now)
            {
                let insert_at = context
                    .iter()
                    .take_while(|m| m.role == Role::System)
                    .count();
                context.insert(insert_at, block);
                total_tokens = estimate_tokens_for_messages(&context);
                retrieved_memories = included;
            }
        }

        ContextWindow {
            messages: context,
            total_tokens,
            pruned_count,
            retrieved_memories,
        }
    }

    /// Detailed token usage; does not modify anything
    pub fn get_token_usage(&self, messages: &[Message]) -> TokenUsage {
        let total_tokens = estimate_tokens_for_messages(messages);
        let effective = self.effective_budget();

        TokenUsage {
            total_tokens,
            max_tokens: self.config.max_tokens,
            effective_max_tokens: effective,
            buffer_tokens: self.config.buffer_tokens,
            available_tokens: effective.saturating_sub(total_tokens),
            message_count: messages.len(),
            per_message_tokens: tokens_per_message(messages),
            needs_pruning: total_tokens > effective,
        }
    }

    /// Drop unprotected messages until the rest fits
    ///
    /// Candidate sizes are tried from largest to smallest and the first one
    /// that fits wins; each candidate keeps the protected messages plus the
    /// top scoring unprotected ones (ties by position). Scores do not depend
    /// on the candidate size, so one sort plus prefix sums over the sorted
    /// costs gives the same selection as rescoring per candidate.
    fn prune_messages(&self, messages: &[Message], now: DateTime<Utc>) -> (Vec<Message>, usize) {
        if messages.is_empty() {
            return (Vec::new(), 0);
        }

        let budget = self.effective_budget();
        let protected = protected_indices(
            messages,
            self.config.always_keep_recent,
            self.config.always_keep_system,
        );
        let costs = tokens_per_message(messages);
        let protected_cost: usize = protected.iter().map(|&i| costs[i]).sum();

        let mut ranked: Vec<(usize, f32)> = messages
            .iter()
            .enumerate()
            .filter(|(idx, _)| !protected.contains(idx))
            .map(|(idx, msg)| (idx, ImportanceCalculator::score_message(msg, now)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut prefix = Vec::with_capacity(ranked.len() + 1);
        prefix.push(0usize);
        for (idx, _) in &ranked {
            let last = prefix[prefix.len() - 1];
            prefix.push(last + costs[*idx]);
        }

        // Keeping every unprotected message is the unpruned list, which is
        // over budget; start one below it.
        let fits = |slots: usize| {
            let kept = protected.len() + slots;
            let tokens = if kept == 0 {
                0
            } else {
                protected_cost + prefix[slots] + CONVERSATION_OVERHEAD
            };
            tokens <= budget
        };
        let slots = (0..ranked.len()).rev().find(|&s| fits(s)).unwrap_or(0);

        let mut keep = vec![false; messages.len()];
        for &idx in &protected {
            keep[idx] = true;
        }
        for (idx, _) in ranked.iter().take(slots) {
            keep[*idx] = true;
        }

        let pruned: Vec<Message> = messages
            .iter()
            .zip(&keep)
            .filter(|(_, keep)| **keep)
            .map(|(m, _)| m.clone())
            .collect();
        let pruned_count = messages.len() - pruned.len();

        tracing::debug!(
            total = messages.len(),
            protected = protected.len(),
            kept = pruned.len(),
            pruned_count,
            budget,
            "Pruned conversation history"
        );

        (pruned, pruned_count)
    }

    /// Format memories as one system message that fits the remaining budget
    ///
    /// Memories are taken in input order; the first one that would overflow
    /// stops the block. Returns `None` when not even one fits.
    fn format_memories(
        &self,
        memories: &[MemoryRecord],
        current_tokens: usize,
        context_is_empty: bool,
        now: DateTime<Utc>,
    ) -> Option<(Message, Vec<MemoryRecord>)> {
        let budget = self.effective_budget();
        if current_tokens >= budget {
            return None;
        }

        let fixed = estimate_tokens(Role::System.as_str())
            + PER_MESSAGE_OVERHEAD
            + if context_is_empty { CONVERSATION_OVERHEAD } else { 0 };
        let mut chars = MEMORY_BLOCK_HEADER.chars().count();
        let mut lines = vec![MEMORY_BLOCK_HEADER.to_string()];
        let mut included = Vec::new();

        for memory in memories {
            let line = format!("- {}", memory.content);
            // +1 for the joining newline
            let next_chars = chars + 1 + line.chars().count();
            let block_tokens = fixed + (next_chars / CHARS_PER_TOKEN).max(1);
            if current_tokens + block_tokens > budget {
                break;
            }
            chars = next_chars;
            lines.push(line);
            included.push(memory.clone());
        }

        if included.is_empty() {
            return None;
        }

        let block = Message {
            role: Role::System,
            content: lines.join("\n"),
            timestamp: now,
        };
        Some((block, included))
    }
}
