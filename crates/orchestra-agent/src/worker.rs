//! Worker agent: runs one delegated task in isolation

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use orchestra_core::{AgentConfig, ProviderSet, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::runtime::{Agent, AgentLoop};
use crate::state::{Outcome, RunSummary, Truncation};
use crate::task::{bound_output, AgentResult, TaskDescription};

pub const DEFAULT_WORKER_PROMPT: &str = "You are a focused worker agent. You receive one task \
with an objective and an output format. Use the available tools when they help, stay within the \
stated boundaries, and finish with a single answer in the requested format. You cannot hand work \
off to other agents.";

/// Runs exactly one task. Consumed by `execute_task`.
pub struct WorkerAgent {
    agent: Agent,
    tools: Arc<ToolRegistry>,
}

impl WorkerAgent {
    /// Workers only ever see a plain registry, so delegation is not reachable from here
    pub fn new(providers: ProviderSet, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_WORKER_PROMPT.to_string());
        Self {
            agent: Agent::new(AgentLoop::new(providers, config), system_prompt),
            tools,
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.list_names()
    }

    pub fn config(&self) -> &AgentConfig {
        self.agent.config()
    }

    pub async fn execute_task(self, task: TaskDescription) -> AgentResult {
        self.execute_task_with_cancel(task, CancellationToken::new()).await
    }

    /// Run the task to completion. Never fails: every problem is reported in the result.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub async fn execute_task_with_cancel(mut self, task: TaskDescription, cancel: CancellationToken) -> AgentResult {
        info!(objective = %task.objective, tools = self.tools.len(), "Worker starting task");

        let prompt = task.to_prompt();
        let max_chars = self.agent.config().max_output_chars;
        let tools = Arc::clone(&self.tools);

        let run = AssertUnwindSafe(self.agent.send(&prompt, tools.as_ref(), &cancel)).catch_unwind();
        let summary = match run.await {
            Ok(summary) => summary,
            Err(_) => {
                warn!(task_id = %task.id, "Worker panicked");
                return AgentResult::failed(task.id, "worker panicked while running the task");
            }
        };

        let result = to_result(task.id, summary, max_chars);
        info!(
            success = result.success,
            tokens_used = result.tokens_used,
            iterations = result.iterations,
            "Worker finished task"
        );
        result
    }
}

impl std::fmt::Debug for WorkerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerAgent")
            .field("tools", &self.tools.list_names())
            .field("config", self.agent.config())
            .finish()
    }
}

fn to_result(task_id: String, summary: RunSummary, max_chars: usize) -> AgentResult {
    let error = match &summary.outcome {
        Outcome::Success => None,
        Outcome::Truncated(Truncation::MaxTokens) => Some("response truncated at max_tokens".to_string()),
        Outcome::Truncated(Truncation::IterationBudget) => {
            Some(format!("iteration budget exhausted after {} iterations", summary.iterations))
        }
        Outcome::Error(e) => Some(format!("all providers failed: {}", e)),
        Outcome::Cancelled => Some("task cancelled".to_string()),
    };

    AgentResult {
        task_id,
        success: error.is_none(),
        output: bound_output(&summary.response, max_chars),
        tokens_used: summary.usage.total(),
        iterations: summary.iterations,
        error,
    }
}
