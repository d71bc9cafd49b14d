//! Agent state management

use orchestra_core::{ConversationHistory, ProviderError, ProviderRole, Usage};
use serde::{Deserialize, Serialize};

/// Token counters. Only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Successful model calls
    pub call_count: u64,
}

impl TokenUsage {
    /// Record one model call
    pub fn record(&mut self, usage: Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.call_count += 1;
    }

    pub fn merge(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.call_count += other.call_count;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn summary(&self) -> String {
        format!(
            "{} calls, {} input + {} output = {} tokens",
            self.call_count,
            self.input_tokens,
            self.output_tokens,
            self.total()
        )
    }
}

/// Why a run stopped early with partial output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// The model hit its output token ceiling
    MaxTokens,
    /// `max_iterations` model calls without a final answer
    IterationBudget,
}

/// Terminal state of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Truncated(Truncation),
    /// Every available provider failed
    Error(ProviderError),
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// State of the agent during one run
#[derive(Debug)]
pub struct AgentState {
    /// Message history, moved in at the start of the run
    pub history: ConversationHistory,
    /// Iteration-consuming model calls made so far
    pub iteration: usize,
    /// Usage accumulated during this run
    pub usage: TokenUsage,
    /// Provider currently answering
    pub active_role: ProviderRole,
    /// Set once the run terminates
    pub outcome: Option<Outcome>,
    /// Final (or best-effort partial) response
    pub response: String,
    /// Most recent non-empty assistant text
    pub last_text: String,
}

impl AgentState {
    pub fn new(history: ConversationHistory, active_role: ProviderRole) -> Self {
        Self {
            history,
            iteration: 0,
            usage: TokenUsage::default(),
            active_role,
            outcome: None,
            response: String::new(),
            last_text: String::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn finish(&mut self, outcome: Outcome, response: String) {
        self.outcome = Some(outcome);
        self.response = response;
    }

    pub fn increment_iteration(&mut self) {
        self.iteration += 1;
    }

    /// Split into the history (handed back to its owner) and the run summary
    pub fn into_parts(self) -> (ConversationHistory, RunSummary) {
        let summary = RunSummary {
            outcome: self.outcome.unwrap_or(Outcome::Truncated(Truncation::IterationBudget)),
            response: self.response,
            iterations: self.iteration,
            usage: self.usage,
            active_role: self.active_role,
        };
        (self.history, summary)
    }
}

/// What a finished run reports back
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: Outcome,
    pub response: String,
    pub iterations: usize,
    pub usage: TokenUsage,
    /// Provider that produced the last response
    pub active_role: ProviderRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_accumulates() {
        let mut usage = TokenUsage::default();
        usage.record(Usage {
            input_tokens: 10,
            output_tokens: 5,
        });
        usage.record(Usage {
            input_tokens: 3,
            output_tokens: 2,
        });

        assert_eq!(usage.call_count, 2);
        assert_eq!(usage.total(), 20);
        assert!(usage.summary().contains("2 calls"));
    }

    #[test]
    fn test_agent_state() {
        let mut state = AgentState::new(ConversationHistory::new(), ProviderRole::Primary);
        assert_eq!(state.iteration, 0);
        assert!(!state.is_finished());

        state.increment_iteration();
        assert_eq!(state.iteration, 1);

        state.finish(Outcome::Success, "Done".to_string());
        let (_, summary) = state.into_parts();
        assert!(summary.outcome.is_success());
        assert_eq!(summary.response, "Done");
        assert_eq!(summary.iterations, 1);
    }
}
