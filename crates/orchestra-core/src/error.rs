//! Error types shared across the runtime

use thiserror::Error;

/// Failure of a single provider call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Network or protocol failure
    #[error("transport error: {0}")]
    Transport(String),
    /// Credentials rejected
    #[error("authentication error: {0}")]
    Auth(String),
}

/// Errors surfaced to callers of an agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// Every configured provider failed
    #[error("all providers failed: {0}")]
    ProvidersExhausted(ProviderError),
    /// The run was cancelled or hit its deadline
    #[error("agent run cancelled")]
    Cancelled,
    /// Tool registration rejected
    #[error("tool registry error: {0}")]
    Registry(String),
}
