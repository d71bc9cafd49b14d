//! Context compaction
//!
//! Keeps the first message (the original framing) and the most recent ones,
//! replacing everything between with a single summary message. Lossy but
//! deterministic: the same input always yields the same output.

use tracing::{debug, warn};

use crate::config::CompactionConfig;
use crate::message::{Message, Role};
use crate::tokenizer::{CharEstimator, TokenEstimator};

/// Marks messages produced by compaction
pub const SUMMARY_PREFIX: &str = "[Earlier conversation compacted]";

/// Whether the estimated size of `messages` exceeds `budget_tokens`
pub fn needs_compaction(messages: &[Message], budget_tokens: usize, estimator: &dyn TokenEstimator) -> bool {
    estimator.estimate_messages(messages) > budget_tokens
}

/// Compact `messages` to at most `max_messages` entries.
///
/// Histories already within `max_messages` come back unchanged, which makes
/// the operation idempotent. The recent window never starts on a tool-result
/// turn whose calls were dropped; it grows backwards to take the assistant
/// turn along.
pub fn compact(messages: &[Message], max_messages: usize, keep_recent: usize) -> Vec<Message> {
    let len = messages.len();
    if len <= max_messages {
        return messages.to_vec();
    }

    // Leave room for the first message, the summary, and one extra turn when
    // the window has to grow to keep a tool pair together.
    let keep_recent = keep_recent.min(max_messages.saturating_sub(3)).max(1);
    let mut start = len - keep_recent;
    while start > 1 && messages[start].role == Role::Tool {
        start -= 1;
    }
    if start <= 1 {
        return messages.to_vec();
    }

    let omitted = &messages[1..start];
    let tool_interactions = omitted.iter().filter(|m| m.is_tool_interaction()).count();
    let text_turns = omitted.len() - tool_interactions;

    debug!(
        omitted = omitted.len(),
        tool_interactions,
        text_turns,
        kept = len - start,
        "Compacting conversation history"
    );

    let summary = Message::user(format!(
        "{} {} earlier messages were removed to stay within the context budget: {} tool interactions and {} text turns.",
        SUMMARY_PREFIX,
        omitted.len(),
        tool_interactions,
        text_turns
    ));

    let mut compacted = Vec::with_capacity(2 + len - start);
    compacted.push(messages[0].clone());
    compacted.push(summary);
    compacted.extend_from_slice(&messages[start..]);
    compacted
}

/// Applies [`compact`] when a history outgrows its token budget
pub struct Compactor {
    config: CompactionConfig,
    estimator: Box<dyn TokenEstimator>,
}

impl Compactor {
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            estimator: Box::new(CharEstimator),
        }
    }

    pub fn with_estimator(mut self, estimator: impl TokenEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    /// Compact if over budget. Returns `None` when nothing changed.
    pub fn maybe_compact(&self, messages: &[Message]) -> Option<Vec<Message>> {
        if !self.config.enabled || !needs_compaction(messages, self.config.budget_tokens, self.estimator.as_ref()) {
            return None;
        }

        let compacted = compact(messages, self.config.max_messages, self.config.keep_recent);
        if compacted.len() == messages.len() {
            warn!(
                messages = messages.len(),
                budget = self.config.budget_tokens,
                "History exceeds token budget but is too short to compact"
            );
            return None;
        }
        Some(compacted)
    }
}

impl Default for Compactor {
    fn default() -> Self {
        Self::new(CompactionConfig::default())
    }
}

impl std::fmt::Debug for Compactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compactor").field("config", &self.config).finish()
    }
}
