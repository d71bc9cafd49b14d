//! Configuration management for orchestra.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::provider::ChatOptions;

/// File name searched for by [`OrchestraConfig::load`]
pub const CONFIG_FILE_NAME: &str = "orchestra.toml";

/// Default cap on the output carried in an `AgentResult`
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 8_000;

/// Per-agent settings. Immutable once handed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier passed to the provider
    pub model: String,
    /// Output token ceiling per model call
    pub max_tokens: u32,
    pub temperature: f32,
    /// Maximum iteration-consuming model calls per run
    pub max_iterations: usize,
    /// System prompt (agent-specific default when unset)
    pub system_prompt: Option<String>,
    /// Bound on the output text of a delegated result
    pub max_output_chars: usize,
    /// Start runs on the premium provider when one is configured
    pub prefer_premium: bool,
    /// Deadline for a whole run, in seconds
    pub run_timeout_secs: Option<u64>,
    /// Context compaction settings
    pub compaction: CompactionConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            max_iterations: 20,
            system_prompt: None,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            prefer_premium: false,
            run_timeout_secs: None,
            compaction: CompactionConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_chars(mut self, max: usize) -> Self {
        self.max_output_chars = max;
        self
    }

    pub fn with_prefer_premium(mut self, prefer: bool) -> Self {
        self.prefer_premium = prefer;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Options sent with every model call
    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// When and how conversation history is compacted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub enabled: bool,
    /// Estimated token count that triggers compaction; keep below the model's real window
    pub budget_tokens: usize,
    /// Histories at or below this length are never compacted
    pub max_messages: usize,
    /// Recent messages kept verbatim
    pub keep_recent: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            budget_tokens: 100_000,
            max_messages: 40,
            keep_recent: 12,
        }
    }
}

/// Overrides applied to delegated workers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_chars: Option<usize>,
}

/// Which memory store to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackend {
    #[default]
    File,
    InMemory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub backend: MemoryBackend,
    /// Base directory for the file store (platform data dir when unset)
    pub path: Option<PathBuf>,
    /// Key under which the orchestrator conversation is persisted
    pub session_key: Option<String>,
}

impl MemoryConfig {
    /// Directory used by the file store
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("orchestra")
                .join("memory")
        })
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestraConfig {
    pub orchestrator: AgentConfig,
    pub worker: WorkerSettings,
    pub compaction: Option<CompactionConfig>,
    pub memory: MemoryConfig,
}

impl OrchestraConfig {
    /// Load configuration from orchestra.toml
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_config_path()?)
    }

    /// Try to load configuration, returning None if not found
    pub fn try_load() -> Option<Self> {
        Self::load().ok()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.as_ref().display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        if let Some(ref compaction) = config.compaction {
            config.orchestrator.compaction = compaction.clone();
        }
        Ok(config)
    }

    /// Find orchestra.toml by searching current directory and parents
    pub fn find_config_path() -> Result<PathBuf> {
        let mut current = std::env::current_dir()?;

        for _ in 0..10 {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Ok(candidate);
            }
            if !current.pop() {
                break;
            }
        }

        anyhow::bail!("{} not found in current directory or parents", CONFIG_FILE_NAME)
    }
}
