//! Tool routing and parallel execution

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use orchestra_core::tool::truncate_output;
use orchestra_core::{ContentBlock, ToolCall, ToolContext, ToolDeclaration, ToolRegistry, ToolResult};
use tracing::{debug, info, instrument, warn};

/// Result of routing a tool call
#[derive(Debug)]
pub enum RouteResult {
    /// Tool ran; the result may still report a failure
    Success(ToolResult),
    /// No tool with that name
    NotFound(String),
    /// Tool returned an error or panicked
    Error(String),
}

impl RouteResult {
    /// Tool-result block answering the call `id`
    pub fn into_block(self, id: &str, max_output_len: usize) -> ContentBlock {
        let (content, is_error) = match self {
            RouteResult::Success(result) => (result.to_content(), !result.success),
            RouteResult::NotFound(name) => (format!("Tool not found: {}", name), true),
            RouteResult::Error(e) => (format!("Tool error: {}", e), true),
        };
        ContentBlock::tool_result(id, truncate_output(&content, max_output_len), is_error)
    }
}

/// Something that can declare and run tools for an agent loop
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    /// Tools offered to the model
    fn declarations(&self) -> Vec<ToolDeclaration>;

    /// Run one call. Failures are reported in the result, never raised.
    async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> RouteResult;
}

#[async_trait]
impl ToolDispatch for ToolRegistry {
    fn declarations(&self) -> Vec<ToolDeclaration> {
        ToolRegistry::declarations(self)
    }

    #[instrument(skip(self, ctx), fields(tool = %call.name, call_id = %call.id))]
    async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> RouteResult {
        let tool = match self.get(&call.name) {
            Some(t) => t,
            None => {
                warn!(tool = %call.name, "Tool not found");
                return RouteResult::NotFound(call.name.clone());
            }
        };

        info!(tool = %call.name, "Executing tool");
        match tool.execute(&call.arguments, ctx).await {
            Ok(result) => {
                if result.success {
                    info!(tool = %call.name, output_len = result.output.len(), "Tool executed successfully");
                } else {
                    warn!(tool = %call.name, error = ?result.error, "Tool execution failed");
                }
                RouteResult::Success(result)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution error");
                RouteResult::Error(e.to_string())
            }
        }
    }
}

/// Run every call of one model turn concurrently.
///
/// Returns one tool-result block per call, in call order, each matched to its
/// call by id. A failing, panicking or cancelled call only affects its own
/// result.
pub async fn execute_tool_calls(dispatch: &dyn ToolDispatch, calls: &[ToolCall], ctx: &ToolContext) -> Vec<ContentBlock> {
    debug!(tool_count = calls.len(), "Processing tool calls");

    let runs = calls.iter().map(|call| async move {
        let routed = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => RouteResult::Error("Tool execution cancelled".to_string()),
            outcome = AssertUnwindSafe(dispatch.dispatch(call, ctx)).catch_unwind() => {
                outcome.unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    warn!(tool = %call.name, error = %message, "Tool panicked");
                    RouteResult::Error(message)
                })
            }
        };
        (call.id.clone(), routed)
    });

    // Ids may repeat if a provider misbehaves; each id keeps a FIFO of results
    let mut by_id: HashMap<String, VecDeque<RouteResult>> = HashMap::new();
    for (id, routed) in join_all(runs).await {
        by_id.entry(id).or_default().push_back(routed);
    }

    calls
        .iter()
        .map(|call| {
            by_id
                .get_mut(&call.id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| RouteResult::Error("No result produced".to_string()))
                .into_block(&call.id, ctx.max_output_len)
        })
        .collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("tool panicked: {}", s)
    } else {
        "tool panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use orchestra_core::{ParameterSchema, Tool};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes input"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
            let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("empty");
            let delay = args.get("delay_ms").and_then(|v| v.as_u64()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(ToolResult::success(text))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fail"
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

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "panic"
        }

        fn description(&self) -> &str {
            "Panics"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
            panic!("kaboom")
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry.register(FailingTool).unwrap();
        registry.register(PanickingTool).unwrap();
        registry
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    fn unpack(block: &ContentBlock) -> (&str, &str, bool) {
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => (tool_use_id.as_str(), content.as_str(), *is_error),
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_results_matched_by_id_not_completion_order() {
        let registry = registry();
        let calls = vec![
            call("slow", "echo", json!({"text": "first", "delay_ms": 50})),
            call("fast", "echo", json!({"text": "second"})),
        ];

        let results = execute_tool_calls(&registry, &calls, &ToolContext::default()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(unpack(&results[0]), ("slow", "first", false));
        assert_eq!(unpack(&results[1]), ("fast", "second", false));
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let registry = registry();
        let calls = vec![
            call("1", "fail", json!({})),
            call("2", "missing", json!({})),
            call("3", "panic", json!({})),
            call("4", "echo", json!({"text": "still here"})),
        ];

        let results = execute_tool_calls(&registry, &calls, &ToolContext::default()).await;

        let (_, content, is_error) = unpack(&results[0]);
        assert!(is_error);
        assert!(content.contains("boom"));

        let (_, content, is_error) = unpack(&results[1]);
        assert!(is_error);
        assert!(content.contains("Tool not found: missing"));

        let (_, content, is_error) = unpack(&results[2]);
        assert!(is_error);
        assert!(content.contains("kaboom"));

        assert_eq!(unpack(&results[3]), ("4", "still here", false));
    }

    #[tokio::test]
    async fn test_cancelled_calls_still_get_results() {
        let registry = registry();
        let ctx = ToolContext::default();
        ctx.cancel.cancel();

        let calls = vec![call("a", "echo", json!({"text": "x", "delay_ms": 1000}))];
        let results = execute_tool_calls(&registry, &calls, &ctx).await;

        let (id, content, is_error) = unpack(&results[0]);
        assert_eq!(id, "a");
        assert!(is_error);
        assert!(content.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_output_truncated_to_context_limit() {
        let registry = registry();
        let ctx = ToolContext::default().with_max_output_len(4);
        let calls = vec![call("a", "echo", json!({"text": "abcdefgh"}))];

        let results = execute_tool_calls(&registry, &calls, &ctx).await;
        let (_, content, _) = unpack(&results[0]);
        assert!(content.starts_with("abcd"));
        assert!(content.contains("truncated"));
    }
}
