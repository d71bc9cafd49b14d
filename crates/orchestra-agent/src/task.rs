//! Delegated task description and result

use orchestra_core::{ParameterProperty, ParameterSchema};
use serde::{Deserialize, Serialize};

/// One bounded subtask, created by the orchestrator and consumed by one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    #[serde(rename = "task_id")]
    pub id: String,
    pub objective: String,
    pub output_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundaries: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl TaskDescription {
    pub fn new(id: impl Into<String>, objective: impl Into<String>, output_format: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            objective: objective.into(),
            output_format: output_format.into(),
            tool_guidance: None,
            boundaries: None,
            context: None,
        }
    }

    pub fn with_tool_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.tool_guidance = Some(guidance.into());
        self
    }

    pub fn with_boundaries(mut self, boundaries: impl Into<String>) -> Self {
        self.boundaries = Some(boundaries.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Input schema of the `delegate_task` tool
    pub fn schema() -> ParameterSchema {
        ParameterSchema::new()
            .with_required("task_id", ParameterProperty::string("Short unique identifier for this subtask"))
            .with_required(
                "objective",
                ParameterProperty::string("What the worker must accomplish, stated completely"),
            )
            .with_required(
                "output_format",
                ParameterProperty::string("Exact shape of the answer the worker should return"),
            )
            .with_property(
                "tool_guidance",
                ParameterProperty::string("Which tools to prefer or avoid"),
            )
            .with_property(
                "boundaries",
                ParameterProperty::string("What is out of scope for this subtask"),
            )
            .with_property(
                "context",
                ParameterProperty::string("Background the worker needs; it sees nothing else"),
            )
    }

    /// The single prompt a worker runs on
    pub fn to_prompt(&self) -> String {
        let mut prompt = format!(
            "# Task {}\n\n## Objective\n{}\n\n## Output format\n{}\n",
            self.id, self.objective, self.output_format
        );

        let optional = [
            ("Tool guidance", &self.tool_guidance),
            ("Boundaries", &self.boundaries),
            ("Context", &self.context),
        ];
        for (title, value) in optional {
            if let Some(text) = value.as_deref().filter(|t| !t.trim().is_empty()) {
                prompt.push_str(&format!("\n## {}\n{}\n", title, text));
            }
        }

        prompt.push_str("\nComplete the objective, then reply with the result in the requested output format.");
        prompt
    }
}

/// Terminal result of one delegated task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: String,
    pub success: bool,
    /// Worker output, bounded in size
    pub output: String,
    pub tokens_used: u64,
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output: String::new(),
            tokens_used: 0,
            iterations: 0,
            error: Some(error.into()),
        }
    }
}

/// Cap `text` at `max_chars` characters, marking the cut
pub fn bound_output(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}\n... [output truncated, {} of {} chars shown]", kept, max_chars, total)
}
