// ABOUTME: Configuration loading for parley.
// ABOUTME: Reads ~/.parley/config.toml and builds the session store and chat defaults from it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::chat::exchange::ChatDefaults;
use crate::session::eviction::{
    Budget, DEFAULT_BUDGET_MULTIPLIER, DEFAULT_MAX_SIZE_BYTES, EvictionPolicy, SizeStrategy,
};
use crate::session::persistence::{FileBackend, MemoryBackend, SessionBackend};
use crate::session::store::{DEFAULT_SYSTEM_MESSAGE, SaveRetry, SessionStore};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub attachment: AttachmentConfig,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub stream: bool,
    pub structured_output: bool,
    pub validate_output: bool,
    pub request_timeout_seconds: u64,
    pub ollama: OllamaConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "gemma3:4b-it-q4_K_M".to_string(),
            stream: true,
            structured_output: true,
            validate_output: true,
            request_timeout_seconds: 300,
            ollama: OllamaConfig::default(),
        }
    }
}

/// Ollama-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
        }
    }
}

/// Where sessions live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    File,
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_size_bytes: usize,
    pub budget_multiplier: usize,
    pub size_strategy: SizeStrategy,
    pub default_system_message: String,
    pub backend: BackendKind,
    /// Directory for the file backend; `~` expands to the home directory.
    pub conversations_dir: Option<String>,
    pub save_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            budget_multiplier: DEFAULT_BUDGET_MULTIPLIER,
            size_strategy: SizeStrategy::Json,
            default_system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
            backend: BackendKind::Memory,
            conversations_dir: None,
            save_retries: 2,
            retry_backoff_ms: 50,
        }
    }
}

impl SessionConfig {
    pub fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::new(
            Budget::new(self.max_size_bytes, self.budget_multiplier),
            self.size_strategy,
        )
    }

    pub fn save_retry(&self) -> SaveRetry {
        SaveRetry {
            attempts: self.save_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Resolved directory for file-backed sessions.
    pub fn conversations_dir(&self) -> PathBuf {
        match self.conversations_dir.as_deref() {
            Some(dir) => expand_home(dir),
            None => Config::base_dir().join("conversations"),
        }
    }

    /// Build the configured persistence backend.
    pub fn backend(&self) -> Arc<dyn SessionBackend> {
        match self.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::File => Arc::new(FileBackend::new(self.conversations_dir())),
        }
    }

    /// Build a session store from this configuration.
    pub fn build_store(&self) -> SessionStore {
        SessionStore::new(self.backend(), self.policy())
            .with_default_system(self.default_system_message.clone())
            .with_save_retry(self.save_retry())
    }
}

/// Attachment resolution configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttachmentConfig {
    pub fetch_timeout_seconds: u64,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_seconds: 30,
        }
    }
}

impl AttachmentConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

impl LlmConfig {
    pub fn chat_defaults(&self) -> ChatDefaults {
        ChatDefaults {
            model: self.model.clone(),
            stream: self.stream,
            structured_output: self.structured_output,
            validate_output: self.validate_output,
        }
    }
}

impl Config {
    /// Load config from ~/.parley/config.toml, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment overrides (`OLLAMA_HOST`).
    pub fn apply_env(&mut self) {
        match std::env::var("OLLAMA_HOST") {
            Ok(host) if !host.is_empty() => self.llm.ollama.base_url = normalize_host(&host),
            _ => {}
        }
    }

    /// Directory holding parley's files.
    pub fn base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".parley")
    }

    /// Path to the config file.
    pub fn config_path() -> PathBuf {
        Self::base_dir().join("config.toml")
    }
}

/// `OLLAMA_HOST` may be a bare `host:port`.
fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}
