//! Orchestrator agent
//!
//! The orchestrator is an ordinary agent loop whose tool set is the shared
//! registry plus `delegate_task`. Each delegation builds a fresh
//! [`WorkerAgent`] that receives only the registry, so workers can never
//! delegate further. Several delegations in one model turn run concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use orchestra_core::{
    open_store, AgentConfig, AgentError, ConversationHistory, MemoryStore, MemoryStoreExt, Message, OrchestraConfig,
    ProviderSet, ToolCall, ToolContext, ToolDeclaration, ToolRegistry, ToolResult, WorkerSettings,
    DELEGATE_TASK_TOOL,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::executor::{RouteResult, ToolDispatch};
use crate::runtime::{Agent, AgentLoop};
use crate::state::{Outcome, TokenUsage};
use crate::task::{bound_output, AgentResult, TaskDescription};
use crate::worker::WorkerAgent;

pub const DEFAULT_ORCHESTRATOR_PROMPT: &str = "You are an orchestrator. Break the user's request into \
independent, bounded subtasks and hand each one to a worker with the delegate_task tool. Workers see \
nothing but the task you give them, so state the objective, the expected output format and any context \
they need. Delegate independent subtasks in the same turn so they run in parallel. When the results are \
back, combine them into one answer for the user.";

/// Memory key under which a delegated result is stored
pub fn task_memory_key(task_id: &str) -> String {
    format!("task:{}", task_id)
}

/// Iteration budget of a delegated worker
pub fn worker_iterations(orchestrator_iterations: usize) -> usize {
    (orchestrator_iterations / 2).max(1)
}

/// Config for delegated workers, derived from the orchestrator's
pub fn worker_config(orchestrator: &AgentConfig, settings: &WorkerSettings) -> AgentConfig {
    let mut config = orchestrator.clone();
    config.max_iterations = worker_iterations(orchestrator.max_iterations);
    config.system_prompt = settings.system_prompt.clone();
    config.prefer_premium = false;
    // Workers run under the orchestrator's token, which already carries its deadline
    config.run_timeout_secs = None;
    if let Some(model) = &settings.model {
        config.model = model.clone();
    }
    if let Some(temperature) = settings.temperature {
        config.temperature = temperature;
    }
    if let Some(max_chars) = settings.max_output_chars {
        config.max_output_chars = max_chars;
    }
    config
}

pub struct OrchestratorAgent {
    agent: Agent,
    providers: ProviderSet,
    tools: Arc<ToolRegistry>,
    worker_config: AgentConfig,
    memory: Option<Arc<dyn MemoryStore>>,
    session_key: Option<String>,
    restored: bool,
}

impl OrchestratorAgent {
    pub fn new(providers: ProviderSet, tools: ToolRegistry, config: AgentConfig) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_ORCHESTRATOR_PROMPT.to_string());
        let worker_config = worker_config(&config, &WorkerSettings::default());
        Self {
            agent: Agent::new(AgentLoop::new(providers.clone(), config), system_prompt),
            providers,
            tools: Arc::new(tools),
            worker_config,
            memory: None,
            session_key: None,
            restored: false,
        }
    }

    /// Build from a loaded configuration file, opening its memory store
    pub fn from_config(providers: ProviderSet, tools: ToolRegistry, config: &OrchestraConfig) -> anyhow::Result<Self> {
        let store = open_store(&config.memory)?;
        let mut orchestrator = Self::new(providers, tools, config.orchestrator.clone())
            .with_worker_settings(&config.worker)
            .with_memory(store);
        if let Some(key) = &config.memory.session_key {
            orchestrator = orchestrator.with_session_key(key.clone());
        }
        Ok(orchestrator)
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Persist the conversation under `key` (needs a memory store)
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self.restored = false;
        self
    }

    pub fn with_worker_settings(mut self, settings: &WorkerSettings) -> Self {
        self.worker_config = worker_config(self.agent.config(), settings);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        self.agent.config()
    }

    pub fn worker_config(&self) -> &AgentConfig {
        &self.worker_config
    }

    pub fn history(&self) -> &[Message] {
        self.agent.history()
    }

    pub fn usage(&self) -> TokenUsage {
        self.agent.usage()
    }

    /// Tools offered to the model, `delegate_task` included
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.dispatcher().declarations()
    }

    pub async fn execute(&mut self, query: &str) -> Result<String, AgentError> {
        self.execute_with_cancel(query, &CancellationToken::new()).await
    }

    /// Answer `query`. Fails only when every provider failed or the run was cancelled.
    #[instrument(skip_all, fields(query_len = query.len()))]
    pub async fn execute_with_cancel(&mut self, query: &str, cancel: &CancellationToken) -> Result<String, AgentError> {
        self.restore_session().await;

        let dispatcher = OrchestratorTools {
            tools: &self.tools,
            providers: &self.providers,
            worker_config: &self.worker_config,
            memory: self.memory.as_ref(),
        };
        let summary = self.agent.send(query, &dispatcher, cancel).await;

        self.persist_session().await;

        match summary.outcome {
            Outcome::Success => Ok(summary.response),
            Outcome::Truncated(reason) => {
                warn!(?reason, iterations = summary.iterations, "Returning truncated answer");
                Ok(summary.response)
            }
            Outcome::Error(e) => Err(AgentError::ProvidersExhausted(e)),
            Outcome::Cancelled => Err(AgentError::Cancelled),
        }
    }

    /// Drop the conversation and its persisted copy. Usage counters are kept.
    pub async fn reset(&mut self) {
        self.agent.reset();
        self.restored = true;
        if let (Some(memory), Some(key)) = (&self.memory, &self.session_key) {
            if let Err(e) = memory.clear(key).await {
                warn!(error = %e, session_key = %key, "Failed to clear persisted session");
            }
        }
    }

    fn dispatcher(&self) -> OrchestratorTools<'_> {
        OrchestratorTools {
            tools: &self.tools,
            providers: &self.providers,
            worker_config: &self.worker_config,
            memory: self.memory.as_ref(),
        }
    }

    async fn restore_session(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;

        let (Some(memory), Some(key)) = (&self.memory, &self.session_key) else {
            return;
        };
        let stored: anyhow::Result<Option<ConversationHistory>> = memory.load_json(key).await;
        match stored {
            Ok(Some(history)) => {
                info!(session_key = %key, messages = history.len(), "Restored conversation from memory");
                self.agent.restore(history);
            }
            Ok(None) => debug!(session_key = %key, "No stored conversation"),
            Err(e) => warn!(error = %e, session_key = %key, "Failed to restore conversation; starting fresh"),
        }
    }

    async fn persist_session(&self) {
        let (Some(memory), Some(key)) = (&self.memory, &self.session_key) else {
            return;
        };
        if let Err(e) = memory.save_json(key, self.agent.history_snapshot()).await {
            warn!(error = %e, session_key = %key, "Failed to persist conversation");
        }
    }
}

impl std::fmt::Debug for OrchestratorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorAgent")
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .field("worker_config", &self.worker_config)
            .field("memory", &self.memory.is_some())
            .field("session_key", &self.session_key)
            .finish()
    }
}

/// Registry tools plus delegation, for one orchestrator run
struct OrchestratorTools<'a> {
    tools: &'a Arc<ToolRegistry>,
    providers: &'a ProviderSet,
    worker_config: &'a AgentConfig,
    memory: Option<&'a Arc<dyn MemoryStore>>,
}

impl<'a> OrchestratorTools<'a> {
    fn delegate_declaration() -> ToolDeclaration {
        ToolDeclaration {
            name: DELEGATE_TASK_TOOL.to_string(),
            description: "Hand one self-contained subtask to a worker agent and receive its result as JSON. \
                          The worker sees only what you put in the task. Call this several times in one \
                          turn to run independent subtasks in parallel."
                .to_string(),
            input_schema: TaskDescription::schema().to_value(),
        }
    }

    #[instrument(skip_all, fields(call_id = %call.id))]
    async fn delegate(&self, call: &ToolCall, ctx: &ToolContext) -> RouteResult {
        let task: TaskDescription = match serde_json::from_value(call.arguments.clone()) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "Invalid delegate_task input");
                return RouteResult::Success(ToolResult::error(format!("Invalid delegate_task input: {}", e)));
            }
        };

        let task_id = task.id.clone();
        info!(task_id = %task_id, "Delegating task to worker");

        let worker = WorkerAgent::new(
            self.providers.for_workers(),
            Arc::clone(self.tools),
            self.worker_config.clone(),
        );
        let result = worker.execute_task_with_cancel(task, ctx.cancel.child_token()).await;

        if let Some(memory) = self.memory {
            if let Err(e) = memory.save_json(&task_memory_key(&task_id), &result).await {
                warn!(task_id = %task_id, error = %e, "Failed to store task result");
            }
        }

        info!(task_id = %task_id, success = result.success, tokens_used = result.tokens_used, "Delegation finished");
        RouteResult::Success(ToolResult::success(render_within(result, ctx.max_output_len)))
    }
}

#[async_trait]
impl<'a> ToolDispatch for OrchestratorTools<'a> {
    fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut declarations = self.tools.declarations();
        declarations.push(Self::delegate_declaration());
        declarations
    }

    async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> RouteResult {
        if call.name == DELEGATE_TASK_TOOL {
            self.delegate(call, ctx).await
        } else {
            self.tools.dispatch(call, ctx).await
        }
    }
}

/// Render `result` as JSON of at most `max_len` bytes.
///
/// The tool-result cap would otherwise cut the document mid-string, so the
/// output field is shortened until the whole document fits.
fn render_within(mut result: AgentResult, max_len: usize) -> String {
    let full = result.output.clone();
    let mut keep = full.chars().count();

    loop {
        let rendered = render_result(&result);
        if rendered.len() <= max_len || keep == 0 {
            return rendered;
        }
        // Each dropped char frees at least one byte; the slack covers the marker
        keep = keep.saturating_sub(rendered.len() - max_len + 64);
        result.output = bound_output(&full, keep);
        debug!(task_id = %result.task_id, keep, "Shortened delegated output to fit tool result");
    }
}

fn render_result(result: &AgentResult) -> String {
    serde_json::to_string_pretty(result).unwrap_or_else(|e| {
        format!(
            "{{\"task_id\": {:?}, \"success\": false, \"error\": \"unserializable result: {}\"}}",
            result.task_id, e
        )
    })
}
