//! End-to-end delegation scenarios with scripted providers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use orchestra_agent::{AgentResult, OrchestratorAgent, DEFAULT_ORCHESTRATOR_PROMPT};
use orchestra_core::{
    AgentConfig, AgentError, ChatOptions, ContentBlock, FileMemory, MemoryStore, MemoryStoreExt, Message,
    ModelResponse, ParameterSchema, Provider, ProviderError, ProviderSet, Role, StopReason, Tool, ToolContext,
    ToolDeclaration, ToolRegistry, ToolResult, Usage, DELEGATE_TASK_TOOL,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Barrier;

fn tool_turn(calls: Vec<(&str, &str, Value)>) -> ModelResponse {
    ModelResponse {
        content: calls
            .into_iter()
            .map(|(id, name, input)| ContentBlock::tool_use(id, name, input))
            .collect(),
        stop_reason: StopReason::ToolUse,
        usage: Usage {
            input_tokens: 20,
            output_tokens: 10,
        },
    }
}

fn task_input(id: &str) -> Value {
    json!({
        "task_id": id,
        "objective": format!("Research topic {}", id),
        "output_format": "One sentence"
    })
}

/// Plays the orchestrator and its workers, told apart by system prompt.
///
/// Workers wait on a shared barrier, so the test only finishes if both run at once.
struct TeamProvider {
    barrier: Barrier,
    worker_tool_sets: Mutex<Vec<Vec<String>>>,
    orchestrator_calls: AtomicUsize,
}

impl TeamProvider {
    fn new(workers: usize) -> Self {
        Self {
            barrier: Barrier::new(workers),
            worker_tool_sets: Mutex::new(Vec::new()),
            orchestrator_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Provider for TeamProvider {
    fn name(&self) -> &str {
        "team"
    }

    async fn send_message(
        &self,
        history: &[Message],
        tools: &[ToolDeclaration],
        system_prompt: &str,
        _options: &ChatOptions,
    ) -> Result<ModelResponse, ProviderError> {
        if system_prompt == DEFAULT_ORCHESTRATOR_PROMPT {
            self.orchestrator_calls.fetch_add(1, Ordering::SeqCst);
            let last = history.last().map(|m| m.role);
            return Ok(match last {
                Some(Role::User) => tool_turn(vec![
                    ("call-a", DELEGATE_TASK_TOOL, task_input("a")),
                    ("call-b", DELEGATE_TASK_TOOL, task_input("b")),
                ]),
                _ => ModelResponse::end_turn("Combined: a and b are done"),
            });
        }

        self.worker_tool_sets
            .lock()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        self.barrier.wait().await;

        let prompt = history.first().map(Message::text).unwrap_or_default();
        let id = if prompt.contains("# Task a") { "a" } else { "b" };
        Ok(ModelResponse::end_turn(format!("finding for {}", id)).with_usage(5, 5))
    }
}

struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Looks things up"
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        Ok(ToolResult::success("nothing found"))
    }
}

struct BoomTool;

#[async_trait]
impl Tool for BoomTool {
    fn name(&self) -> &str {
        "boom"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        bail!("boom")
    }
}

struct NamedDelegate;

#[async_trait]
impl Tool for NamedDelegate {
    fn name(&self) -> &str {
        DELEGATE_TASK_TOOL
    }

    fn description(&self) -> &str {
        "Tries to sneak delegation into a registry"
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        Ok(ToolResult::success("should never run"))
    }
}

/// Replays a fixed list of responses, then fails
struct Scripted {
    responses: Mutex<Vec<Result<ModelResponse, ProviderError>>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(mut responses: Vec<Result<ModelResponse, ProviderError>>) -> Arc<Self> {
        responses.reverse();
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send_message(
        &self,
        _history: &[Message],
        _tools: &[ToolDeclaration],
        _system_prompt: &str,
        _options: &ChatOptions,
    ) -> Result<ModelResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .pop()
            .unwrap_or_else(|| Err(ProviderError::Transport("script exhausted".into())))
    }
}

/// Always asks for the same tool
struct Looping {
    calls: AtomicUsize,
}

#[async_trait]
impl Provider for Looping {
    fn name(&self) -> &str {
        "looping"
    }

    async fn send_message(
        &self,
        _history: &[Message],
        _tools: &[ToolDeclaration],
        _system_prompt: &str,
        _options: &ChatOptions,
    ) -> Result<ModelResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut response = tool_turn(vec![("again", "search", json!({}))]);
        response.content.insert(0, ContentBlock::text(format!("pass {}", n + 1)));
        Ok(response)
    }
}

fn tool_results(message: &Message) -> Vec<(String, String, bool)> {
    message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some((tool_use_id.clone(), content.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_parallel_delegations_run_concurrently() {
    orchestra_core::logging::init_for_tests();
    let provider = Arc::new(TeamProvider::new(2));
    let mut tools = ToolRegistry::new();
    tools.register(SearchTool).unwrap();

    let mut orchestrator = OrchestratorAgent::new(ProviderSet::new(provider.clone()), tools, AgentConfig::default());

    let answer = tokio::time::timeout(Duration::from_secs(5), orchestrator.execute("Research a and b"))
        .await
        .expect("workers did not run concurrently")
        .unwrap();
    assert_eq!(answer, "Combined: a and b are done");
    assert_eq!(provider.orchestrator_calls.load(Ordering::SeqCst), 2);

    // user, assistant (two delegations), tool results, final answer
    let history = orchestrator.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[2].role, Role::Tool);

    let results = tool_results(&history[2]);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "call-a");
    assert_eq!(results[1].0, "call-b");

    let a: AgentResult = serde_json::from_str(&results[0].1).unwrap();
    let b: AgentResult = serde_json::from_str(&results[1].1).unwrap();
    assert!(a.success && b.success);
    assert_eq!(a.output, "finding for a");
    assert_eq!(b.output, "finding for b");
    assert_eq!(a.tokens_used, 10);
}

#[tokio::test]
async fn test_workers_never_see_delegate_task() {
    let provider = Arc::new(TeamProvider::new(2));
    let mut tools = ToolRegistry::new();
    tools.register(SearchTool).unwrap();
    assert!(matches!(tools.register(NamedDelegate), Err(AgentError::Registry(_))));

    let mut orchestrator = OrchestratorAgent::new(ProviderSet::new(provider.clone()), tools, AgentConfig::default());
    assert!(orchestrator.declarations().iter().any(|d| d.name == DELEGATE_TASK_TOOL));

    tokio::time::timeout(Duration::from_secs(5), orchestrator.execute("Research a and b"))
        .await
        .expect("workers did not run concurrently")
        .unwrap();

    let seen = provider.worker_tool_sets.lock();
    assert_eq!(seen.len(), 2);
    for tool_set in seen.iter() {
        assert_eq!(tool_set, &vec!["search".to_string()]);
    }
}

#[tokio::test]
async fn test_failing_tool_reported_and_loop_continues() {
    orchestra_core::logging::init_for_tests();
    let provider = Scripted::new(vec![
        Ok(tool_turn(vec![("t1", "boom", json!({}))])),
        Ok(ModelResponse::end_turn("handled the failure")),
    ]);
    let mut tools = ToolRegistry::new();
    tools.register(BoomTool).unwrap();
    let mut orchestrator = OrchestratorAgent::new(ProviderSet::new(provider.clone()), tools, AgentConfig::default());

    let answer = orchestrator.execute("try the tool").await.unwrap();

    assert_eq!(answer, "handled the failure");
    assert_eq!(provider.calls(), 2);
    let results = tool_results(&orchestrator.history()[2]);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "t1");
    assert!(results[0].1.contains("boom"));
    assert!(results[0].2);
}

#[tokio::test]
async fn test_fallback_output_returned_verbatim() {
    let primary = Scripted::new(vec![Err(ProviderError::Transport("503 from upstream".into()))]);
    let fallback = Scripted::new(vec![Ok(ModelResponse::end_turn("fallback says hi"))]);
    let providers = ProviderSet::new(primary.clone()).with_fallback(fallback.clone());
    let mut orchestrator = OrchestratorAgent::new(providers, ToolRegistry::new(), AgentConfig::default());

    let answer = orchestrator.execute("hello").await.unwrap();

    assert_eq!(answer, "fallback says hi");
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 1);
}

#[tokio::test]
async fn test_both_providers_failing_is_an_error() {
    let primary = Scripted::new(vec![Err(ProviderError::Transport("down".into()))]);
    let fallback = Scripted::new(vec![Err(ProviderError::Auth("expired key".into()))]);
    let providers = ProviderSet::new(primary).with_fallback(fallback);
    let mut orchestrator = OrchestratorAgent::new(providers, ToolRegistry::new(), AgentConfig::default());

    let err = orchestrator.execute("hello").await.unwrap_err();
    match err {
        AgentError::ProvidersExhausted(ProviderError::Auth(msg)) => assert_eq!(msg, "expired key"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_iteration_budget_returns_partial_answer() {
    let provider = Arc::new(Looping {
        calls: AtomicUsize::new(0),
    });
    let mut tools = ToolRegistry::new();
    tools.register(SearchTool).unwrap();
    let config = AgentConfig::default().with_max_iterations(3);
    let mut orchestrator = OrchestratorAgent::new(ProviderSet::new(provider.clone()), tools, config);

    let answer = orchestrator.execute("never ends").await.unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    assert_eq!(answer, "pass 3");
    assert_eq!(orchestrator.usage().call_count, 3);
}

#[tokio::test]
async fn test_delegated_results_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Scripted::new(vec![
        Ok(tool_turn(vec![("d", DELEGATE_TASK_TOOL, task_input("notes"))])),
        Ok(ModelResponse::end_turn("notes gathered")),
        Ok(ModelResponse::end_turn("Here are the notes")),
    ]);

    {
        let memory: Arc<dyn MemoryStore> = Arc::new(FileMemory::new(dir.path()).unwrap());
        let mut orchestrator =
            OrchestratorAgent::new(ProviderSet::new(provider), ToolRegistry::new(), AgentConfig::default())
                .with_memory(memory)
                .with_session_key("session");
        assert_eq!(orchestrator.execute("collect notes").await.unwrap(), "Here are the notes");
    }

    let reopened = FileMemory::new(dir.path()).unwrap();
    let stored: AgentResult = reopened.load_json("task:notes").await.unwrap().unwrap();
    assert_eq!(stored.task_id, "notes");
    assert_eq!(stored.output, "notes gathered");
    assert!(stored.success);

    let session = reopened.load("session").await.unwrap().unwrap();
    assert_eq!(session.as_array().map(Vec::len), Some(4));
}
