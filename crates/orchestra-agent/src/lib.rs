//! orchestra-agent: Orchestrator/worker agent runtime
//!
//! Provides:
//! - Agent loop with fallback-provider retry and context compaction
//! - Parallel tool execution
//! - WorkerAgent (one isolated task per worker)
//! - OrchestratorAgent (delegation via `delegate_task`)

pub mod executor;
pub mod orchestrator;
pub mod runtime;
pub mod state;
pub mod task;
pub mod worker;

pub use executor::{execute_tool_calls, RouteResult, ToolDispatch};
pub use orchestrator::{worker_config, OrchestratorAgent, DEFAULT_ORCHESTRATOR_PROMPT};
pub use runtime::{Agent, AgentLoop};
pub use state::{AgentState, Outcome, RunSummary, TokenUsage, Truncation};
pub use task::{bound_output, AgentResult, TaskDescription};
pub use worker::{WorkerAgent, DEFAULT_WORKER_PROMPT};
