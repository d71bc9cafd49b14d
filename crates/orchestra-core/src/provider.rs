//! Model provider contract
//!
//! A provider executes one model call for a conversation. Concrete wire
//! protocols live outside this crate; everything here is written against
//! the [`Provider`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::message::{ContentBlock, Message, StopReason, Usage};

/// Per-call generation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Tool declaration exposed to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Response to one model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    #[serde(default)]
    pub usage: Usage,
}

impl ModelResponse {
    /// Final text answer
    pub fn end_turn(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Usage {
            input_tokens,
            output_tokens,
        };
        self
    }

    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A pluggable model backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Run one model call over the full history
    async fn send_message(
        &self,
        history: &[Message],
        tools: &[ToolDeclaration],
        system_prompt: &str,
        options: &ChatOptions,
    ) -> Result<ModelResponse, ProviderError>;
}

/// Role a provider plays in a [`ProviderSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    /// Default provider for every run
    Primary,
    /// Retried once the active provider fails
    Fallback,
    /// Opt-in provider for runs that ask for it
    Premium,
}

impl std::fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderRole::Primary => write!(f, "primary"),
            ProviderRole::Fallback => write!(f, "fallback"),
            ProviderRole::Premium => write!(f, "premium"),
        }
    }
}

/// Providers injected into an agent, one per role
#[derive(Clone)]
pub struct ProviderSet {
    primary: Arc<dyn Provider>,
    fallback: Option<Arc<dyn Provider>>,
    premium: Option<Arc<dyn Provider>>,
}

impl ProviderSet {
    pub fn new(primary: Arc<dyn Provider>) -> Self {
        Self {
            primary,
            fallback: None,
            premium: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Provider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_premium(mut self, premium: Arc<dyn Provider>) -> Self {
        self.premium = Some(premium);
        self
    }

    /// Provider registered for a role
    pub fn get(&self, role: ProviderRole) -> Option<&Arc<dyn Provider>> {
        match role {
            ProviderRole::Primary => Some(&self.primary),
            ProviderRole::Fallback => self.fallback.as_ref(),
            ProviderRole::Premium => self.premium.as_ref(),
        }
    }

    /// Role that starts a run
    pub fn lead(&self, prefer_premium: bool) -> ProviderRole {
        if prefer_premium && self.premium.is_some() {
            ProviderRole::Premium
        } else {
            ProviderRole::Primary
        }
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// The set handed to delegated workers: same primary and fallback, no premium
    pub fn for_workers(&self) -> Self {
        Self {
            primary: Arc::clone(&self.primary),
            fallback: self.fallback.clone(),
            premium: None,
        }
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|p| p.name().to_string()))
            .field("premium", &self.premium.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}
