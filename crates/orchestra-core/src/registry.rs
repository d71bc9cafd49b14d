//! Name-indexed tool set

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::AgentError;
use crate::provider::ToolDeclaration;
use crate::tool::Tool;

/// Name of the orchestrator's delegation capability
pub const DELEGATE_TASK_TOOL: &str = "delegate_task";

/// Names no registered tool may use
pub const RESERVED_TOOL_NAMES: &[&str] = &[DELEGATE_TASK_TOOL];

/// Registry of available tools.
///
/// Delegation is never a registered tool, so a registry handed to a worker
/// cannot grant it.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if RESERVED_TOOL_NAMES.contains(&name.as_str()) {
            return Err(AgentError::Registry(format!("tool name '{}' is reserved", name)));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all registered tool names, sorted
    pub fn list_names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Declarations for the model, sorted by name
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.values().map(|t| t.to_declaration()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list_names())
            .finish()
    }
}
