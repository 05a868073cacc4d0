//! Importance scoring for messages and memories
//!
//! A reproducible heuristic combining:
//! - Recency: exponential decay with a 24 hour constant
//! - Content signal: keywords, questions, code, lists, links, length
//! - Interaction density: messages that received replies
//! - Role: user turns weigh more than assistant turns

use crate::types::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Phrases that mark a message as worth keeping
pub const HIGH_IMPORTANCE_KEYWORDS: &[&str] = &[
    "error",
    "exception",
    "failed",
    "bug",
    "issue",
    "important",
    "critical",
    "urgent",
    "decided",
    "decision",
    "conclusion",
    "summary",
    "key point",
    "note that",
    "remember",
    "don't forget",
];

/// Weights of the four scoring components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportanceWeights {
    pub recency: f64,
    pub content: f64,
    pub interaction: f64,
    pub role: f64,
    /// Decay constant for recency, in hours
    pub recency_hours: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            recency: 0.3,
            content: 0.4,
            interaction: 0.2,
            role: 0.1,
            recency_hours: 24.0,
        }
    }
}

/// Importance calculator
pub struct ImportanceCalculator;

impl ImportanceCalculator {
    /// Score a message or memory in `[0.0, 1.0]`
    pub fn calculate(
        content: &str,
        role: &str,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
        has_replies: bool,
    ) -> f32 {
        Self::calculate_with_weights(
            content,
            role,
            timestamp,
            now,
            has_replies,
            &ImportanceWeights::default(),
        )
    }

    /// Score with custom weights
    pub fn calculate_with_weights(
        content: &str,
        role: &str,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
        has_replies: bool,
        weights: &ImportanceWeights,
    ) -> f32 {
        let hours = (now - timestamp).num_milliseconds() as f64 / 3_600_000.0;
        let recency = (-hours / weights.recency_hours).exp();

        let content_importance = Self::content_importance(content);

        let interaction = if has_replies { 1.0 } else { 0.5 };

        let score = recency * weights.recency
            + content_importance * weights.content
            + interaction * weights.interaction
            + Self::role_factor(role) * weights.role;

        score.clamp(0.0, 1.0) as f32
    }

    /// Score a conversation message that has no reply information
    pub fn score_message(message: &Message, now: DateTime<Utc>) -> f32 {
        Self::calculate(
            &message.content,
            message.role.as_str(),
            message.timestamp,
            now,
            false,
        )
    }

    /// Role bonus; unknown roles get the assistant value
    pub fn role_factor(role: &str) -> f64 {
        match role.to_ascii_lowercase().as_str() {
            "user" => 1.0,
            "system" => 0.9,
            _ => 0.7,
        }
    }

    /// Content signal in `[0.0, 1.0]`
    pub fn content_importance(content: &str) -> f64 {
        if content.is_empty() {
            return 0.0;
        }

        let mut score: f64 = 0.5;
        let lower = content.to_lowercase();

        for keyword in HIGH_IMPORTANCE_KEYWORDS {
            if lower.contains(keyword) {
                score += 0.1;
            }
        }

        if content.contains('?') {
            score += 0.15;
        }

        // Fenced blocks contain the inline marker too
        if content.contains('`') {
            score += 0.1;
        }

        if content.lines().any(is_list_line) {
            score += 0.05;
        }

        if content.contains("http://") || content.contains("https://") {
            score += 0.05;
        }

        let len = content.chars().count();
        if len > 500 {
            score += 0.05;
        }
        if len < 20 {
            score -= 0.1;
        }

        score.clamp(0.0, 1.0)
    }
}

/// `- item`, `* item` or `12. item`
fn is_list_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some('-') | Some('*') => matches!(chars.next(), Some(c) if c.is_whitespace() || c == '.'),
        Some(c) if c.is_ascii_digit() => {
            let rest = trimmed.trim_start_matches(|c: char| c.is_ascii_digit());
            rest.starts_with('.')
        }
        _ => false,
    }
}

/// Rank messages by importance, highest first; ties keep their original order
pub fn rank_messages_by_importance(messages: &[Message], now: DateTime<Utc>) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = messages
        .iter()
        .enumerate()
        .map(|(idx, msg)| (idx, ImportanceCalculator::score_message(msg, now)))
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

/// Indices of messages that are exempt from pruning
pub fn protected_indices(
    messages: &[Message],
    always_keep_recent: usize,
    always_keep_system: bool,
) -> HashSet<usize> {
    let mut protected = HashSet::new();

    if always_keep_system {
        protected.extend(
            messages
                .iter()
                .enumerate()
                .filter(|(_, m)| m.role == crate::types::Role::System)
                .map(|(idx, _)| idx),
        );
    }

    let recent_start = messages.len().saturating_sub(always_keep_recent);
    protected.extend(recent_start..messages.len());

    protected
}

/// Select which messages to drop so that `keep_count` remain
///
/// Protected messages always stay; the remaining slots go to the highest
/// scoring unprotected messages. Returns the sorted indices to remove.
pub fn select_messages_to_prune(
    messages: &[Message],
    keep_count: usize,
    always_keep_recent: usize,
    always_keep_system: bool,
    now: DateTime<Utc>,
) -> Vec<usize> {
    if messages.len() <= keep_count {
        return Vec::new();
    }

    let protected = protected_indices(messages, always_keep_recent, always_keep_system);
    let remaining_slots = keep_count.saturating_sub(protected.len());

    let mut unprotected: Vec<(usize, f32)> = messages
        .iter()
        .enumerate()
        .filter(|(idx, _)| !protected.contains(idx))
        .map(|(idx, msg)| (idx, ImportanceCalculator::score_message(msg, now)))
        .collect();

    if remaining_slots == 0 {
        return unprotected.into_iter().map(|(idx, _)| idx).collect();
    }

    unprotected.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut to_remove: Vec<usize> = unprotected
        .into_iter()
        .skip(remaining_slots)
        .map(|(idx, _)| idx)
        .collect();
    to_remove.sort_unstable();
    to_remove
}
