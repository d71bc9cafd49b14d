//! orchestra-core: Shared contracts for the orchestra agent runtime
//!
//! Provides:
//! - Conversation message model
//! - Provider contract and provider roles
//! - Tool contract and registry
//! - Memory contract with file-backed and in-memory stores
//! - Context compaction and token estimation
//! - Configuration loading (orchestra.toml)

pub mod compaction;
pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod message;
pub mod provider;
pub mod registry;
pub mod tokenizer;
pub mod tool;

pub use compaction::{compact, needs_compaction, Compactor, SUMMARY_PREFIX};
pub use config::{AgentConfig, CompactionConfig, MemoryBackend, MemoryConfig, OrchestraConfig, WorkerSettings};
pub use error::{AgentError, ProviderError};
pub use memory::{open_store, FileMemory, InMemoryMemory, MemoryEntry, MemoryStore, MemoryStoreExt};
pub use message::{ContentBlock, ConversationHistory, Message, Role, StopReason, ToolCall, Usage};
pub use provider::{ChatOptions, ModelResponse, Provider, ProviderRole, ProviderSet, ToolDeclaration};
pub use registry::{ToolRegistry, DELEGATE_TASK_TOOL};
pub use tokenizer::{estimate_tokens, CharEstimator, Cl100kEstimator, TokenEstimator};
pub use tool::{ParameterProperty, ParameterSchema, Tool, ToolContext, ToolResult};
