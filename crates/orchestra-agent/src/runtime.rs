//! Agent loop implementation
//!
//! One run: call the model, execute requested tools, feed the results back,
//! until the model answers, the budget runs out, or every provider fails.

use std::time::Duration;

use orchestra_core::{
    AgentConfig, Compactor, ContentBlock, ConversationHistory, Message, ModelResponse, ProviderError, ProviderRole,
    ProviderSet, Role, StopReason, TokenEstimator, ToolContext, ToolDeclaration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::executor::{execute_tool_calls, ToolDispatch};
use crate::state::{AgentState, Outcome, RunSummary, TokenUsage, Truncation};

/// Stateless loop driver: providers, config and compaction policy
pub struct AgentLoop {
    providers: ProviderSet,
    config: AgentConfig,
    compactor: Compactor,
}

impl AgentLoop {
    pub fn new(providers: ProviderSet, config: AgentConfig) -> Self {
        let compactor = Compactor::new(config.compaction.clone());
        Self {
            providers,
            config,
            compactor,
        }
    }

    /// Swap the token estimate used to trigger compaction
    pub fn with_estimator(mut self, estimator: impl TokenEstimator + 'static) -> Self {
        self.compactor = Compactor::new(self.config.compaction.clone()).with_estimator(estimator);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Run the loop over `history`, which is moved in and handed back in the state
    #[instrument(
        skip_all,
        fields(model = %self.config.model, run_id = %uuid::Uuid::new_v4(), max_iterations = self.config.max_iterations)
    )]
    pub async fn run(
        &self,
        history: ConversationHistory,
        system_prompt: &str,
        tools: &dyn ToolDispatch,
        cancel: &CancellationToken,
    ) -> AgentState {
        info!(messages = history.len(), "Starting agent loop");

        let run_cancel = cancel.child_token();
        let _deadline = self.config.run_timeout().map(|t| Deadline::arm(t, run_cancel.clone()));

        let mut state = AgentState::new(history, self.providers.lead(self.config.prefer_premium));
        let declarations = tools.declarations();
        let tool_ctx = ToolContext::new(run_cancel.clone());

        while !state.is_finished() && state.iteration < self.config.max_iterations {
            if run_cancel.is_cancelled() {
                warn!(iteration = state.iteration, "Agent run cancelled");
                let partial = state.last_text.clone();
                state.finish(Outcome::Cancelled, partial);
                break;
            }

            if let Some(compacted) = self.compactor.maybe_compact(state.history.messages()) {
                info!(
                    before = state.history.len(),
                    after = compacted.len(),
                    "Compacted conversation history"
                );
                state.history = ConversationHistory::from(compacted);
            }

            state.increment_iteration();
            debug!(iteration = state.iteration, messages = state.history.len(), "Starting iteration");

            let response = match self
                .call_model(&mut state, &declarations, system_prompt, &run_cancel)
                .await
            {
                Ok(Some(response)) => response,
                Ok(None) => {
                    warn!(iteration = state.iteration, "Agent run cancelled during model call");
                    let partial = state.last_text.clone();
                    state.finish(Outcome::Cancelled, partial);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "All providers failed");
                    let partial = state.last_text.clone();
                    state.finish(Outcome::Error(e), partial);
                    break;
                }
            };

            state.usage.record(response.usage);
            debug!(
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                stop_reason = ?response.stop_reason,
                "Recorded token usage"
            );

            let mut assistant = Message::new(Role::Assistant, response.content);
            let text = assistant.text();
            if !text.is_empty() {
                state.last_text = text.clone();
            }

            match response.stop_reason {
                StopReason::ToolUse if assistant.content.iter().any(ContentBlock::is_tool_use) => {
                    assign_missing_call_ids(&mut assistant);
                    let calls = assistant.tool_calls();
                    state.history.push(assistant);

                    let results = execute_tool_calls(tools, &calls, &tool_ctx).await;
                    state.history.push(Message::tool_results(results));
                }
                StopReason::ToolUse | StopReason::EndTurn => {
                    if response.stop_reason == StopReason::ToolUse {
                        warn!("Model signalled tool use without tool calls; treating as final answer");
                    }
                    info!(iterations = state.iteration, "Agent completed task");
                    state.history.push(assistant.without_tool_use());
                    state.finish(Outcome::Success, text);
                }
                StopReason::MaxTokens => {
                    warn!(
                        iteration = state.iteration,
                        max_tokens = self.config.max_tokens,
                        "Response truncated at max_tokens"
                    );
                    let kept = assistant.without_tool_use();
                    if !kept.content.is_empty() {
                        state.history.push(kept);
                    }
                    state.finish(Outcome::Truncated(Truncation::MaxTokens), text);
                }
            }
        }

        if !state.is_finished() {
            warn!(max_iterations = self.config.max_iterations, "Agent reached maximum iterations");
            let partial = state.last_text.clone();
            state.finish(Outcome::Truncated(Truncation::IterationBudget), partial);
        }

        info!(
            outcome = ?state.outcome,
            iterations = state.iteration,
            usage = %state.usage.summary(),
            provider = %state.active_role,
            "Agent loop completed"
        );

        state
    }

    /// One model call, switching to the fallback provider once on failure.
    ///
    /// `Ok(None)` means the run was cancelled while waiting.
    async fn call_model(
        &self,
        state: &mut AgentState,
        declarations: &[ToolDeclaration],
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ModelResponse>, ProviderError> {
        let options = self.config.chat_options();

        loop {
            let Some(provider) = self.providers.get(state.active_role) else {
                return Err(ProviderError::Transport(format!(
                    "no {} provider configured",
                    state.active_role
                )));
            };

            debug!(provider = provider.name(), role = %state.active_role, "Calling model");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                result = provider.send_message(state.history.messages(), declarations, system_prompt, &options) => result,
            };

            match result {
                Ok(response) => return Ok(Some(response)),
                Err(e) if state.active_role != ProviderRole::Fallback && self.providers.has_fallback() => {
                    warn!(
                        provider = provider.name(),
                        error = %e,
                        "Provider failed; retrying with fallback"
                    );
                    state.active_role = ProviderRole::Fallback;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("providers", &self.providers)
            .field("config", &self.config)
            .finish()
    }
}

/// A loop plus the conversation and counters it owns
#[derive(Debug)]
pub struct Agent {
    runtime: AgentLoop,
    system_prompt: String,
    history: ConversationHistory,
    usage: TokenUsage,
}

impl Agent {
    pub fn new(runtime: AgentLoop, system_prompt: impl Into<String>) -> Self {
        Self {
            runtime,
            system_prompt: system_prompt.into(),
            history: ConversationHistory::new(),
            usage: TokenUsage::default(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        self.runtime.config()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Read-only view of the conversation
    pub fn history(&self) -> &[Message] {
        self.history.messages()
    }

    /// Usage across every run of this instance
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Drop the conversation. Usage counters are kept.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Replace the conversation, e.g. with one restored from memory
    pub(crate) fn restore(&mut self, history: ConversationHistory) {
        self.history = history;
    }

    pub(crate) fn history_snapshot(&self) -> &ConversationHistory {
        &self.history
    }

    /// Append `input` as a user turn and run the loop to termination
    pub async fn send(&mut self, input: &str, tools: &dyn ToolDispatch, cancel: &CancellationToken) -> RunSummary {
        let mut history = std::mem::take(&mut self.history);
        history.push(Message::user(input));

        let state = self.runtime.run(history, &self.system_prompt, tools, cancel).await;
        let (history, summary) = state.into_parts();

        self.history = history;
        self.usage.merge(&summary.usage);
        summary
    }
}

/// Cancels a token when a deadline passes; disarmed on drop
struct Deadline(JoinHandle<()>);

impl Deadline {
    fn arm(after: Duration, token: CancellationToken) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            warn!(timeout_secs = after.as_secs(), "Agent run deadline reached");
            token.cancel();
        }))
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Providers may omit call ids; results are correlated by id, so fill them in
fn assign_missing_call_ids(message: &mut Message) {
    for block in &mut message.content {
        if let ContentBlock::ToolUse { id, .. } = block {
            if id.is_empty() {
                *id = uuid::Uuid::new_v4().to_string();
            }
        }
    }
}
