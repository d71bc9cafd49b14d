//! Token estimation
//!
//! Every count here is an estimate used to decide when to compact. Billing
//! figures come from provider usage, never from this module.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::message::{ContentBlock, Message};

/// Characters per token for the length heuristic
pub const CHARS_PER_TOKEN: usize = 4;

/// Global BPE (lazy initialized)
static CL100K_TOKENIZER: Lazy<Mutex<Option<CoreBPE>>> = Lazy::new(|| Mutex::new(cl100k_base().ok()));

/// Pluggable token estimate.
///
/// Implementations must be monotonic: appending a message never lowers the
/// estimate for a history.
pub trait TokenEstimator: Send + Sync {
    fn estimate_text(&self, text: &str) -> usize;

    fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .flat_map(|m| &m.content)
            .map(|block| match block {
                ContentBlock::Text { text } => self.estimate_text(text),
                ContentBlock::ToolUse { name, input, .. } => {
                    self.estimate_text(name) + self.estimate_text(&input.to_string())
                }
                ContentBlock::ToolResult { content, .. } => self.estimate_text(content),
            })
            .sum()
    }
}

/// Total content length divided by four
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimator;

impl TokenEstimator for CharEstimator {
    fn estimate_text(&self, text: &str) -> usize {
        text.len() / CHARS_PER_TOKEN
    }

    fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(Message::content_len).sum::<usize>() / CHARS_PER_TOKEN
    }
}

/// cl100k BPE count, falling back to the length heuristic if the BPE tables fail to load
#[derive(Debug, Clone, Copy, Default)]
pub struct Cl100kEstimator;

impl TokenEstimator for Cl100kEstimator {
    fn estimate_text(&self, text: &str) -> usize {
        let guard = CL100K_TOKENIZER.lock();
        match *guard {
            Some(ref bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.len() / CHARS_PER_TOKEN,
        }
    }
}

/// Estimate tokens for a history with the default heuristic
pub fn estimate_tokens(messages: &[Message]) -> usize {
    CharEstimator.estimate_messages(messages)
}
