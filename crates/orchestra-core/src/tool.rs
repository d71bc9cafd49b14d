//! Tool contract
//!
//! Any type implementing [`Tool`] can be registered and offered to the model.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::provider::ToolDeclaration;

/// Default cap on tool output handed back to the model
pub const DEFAULT_MAX_OUTPUT_LEN: usize = 50_000;

/// What a tool hands back; `success: false` is reported to the model, not raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Failure that still carries partial output
    pub fn failure(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Text handed back to the model
    pub fn to_content(&self) -> String {
        match (&self.error, self.output.is_empty()) {
            (None, _) => self.output.clone(),
            (Some(err), true) => err.clone(),
            (Some(err), false) => format!("{}\n\nError: {}", self.output, err),
        }
    }
}

/// Per-call execution context
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Cancelled when the owning run is cancelled or times out
    pub cancel: CancellationToken,
    /// Byte cap on the content handed back to the model
    pub max_output_len: usize,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            max_output_len: DEFAULT_MAX_OUTPUT_LEN,
        }
    }
}

impl ToolContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Default::default()
        }
    }

    pub fn with_max_output_len(mut self, len: usize) -> Self {
        self.max_output_len = len;
        self
    }
}

/// One property of a tool's input schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterProperty {
    /// JSON Schema type name
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

impl ParameterProperty {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            allowed: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new("string", description)
    }

    /// Restrict the value to a fixed set
    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }
}

/// Object schema of a tool's input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Always "object"
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: HashMap<String, ParameterProperty>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: HashMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// A capability the model can invoke by name
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> ParameterSchema;

    /// Execute the tool with the given arguments.
    ///
    /// Long-running tools should watch `ctx.cancel`.
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult>;

    /// Declaration offered to the model
    fn to_declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema().to_value(),
        }
    }
}

/// Cut `text` to at most `max_len` bytes on a char boundary, with a marker
pub fn truncate_output(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n... (truncated, {} more bytes)",
        &text[..end],
        text.len() - end
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_serializes_as_json_schema() {
        let schema = ParameterSchema::new()
            .with_required("path", ParameterProperty::string("File path"))
            .with_property(
                "mode",
                ParameterProperty::string("Open mode").one_of(&["r", "w"]),
            );
        let value = schema.to_value();
        assert_eq!(value["type"], "object");
        assert_eq!(value["required"][0], "path");
        assert_eq!(value["properties"]["mode"]["enum"][1], "w");
    }

    #[test]
    fn test_tool_result_content() {
        assert_eq!(ToolResult::success("done").to_content(), "done");
        assert_eq!(ToolResult::error("boom").to_content(), "boom");
        assert!(ToolResult::failure("partial", "boom").to_content().contains("Error: boom"));
    }

    #[test]
    fn test_truncate_output_respects_char_boundary() {
        let text = "héllo wörld";
        let cut = truncate_output(text, 2);
        assert!(cut.starts_with('h'));
        assert!(cut.contains("truncated"));
        assert_eq!(truncate_output("short", 100), "short");
    }
}
