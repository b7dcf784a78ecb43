use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{AskStreamError, Result};

/// Main configuration structure for askstream
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream completion provider configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// History storage configuration
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration from an explicit path, or from the first default
    /// location that exists, falling back to built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".askstream").join("config.toml")),
            dirs::config_dir().map(|c| c.join("askstream").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AskStreamError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| AskStreamError::Config(format!("Failed to parse config: {e}")))
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Number of history entries returned when the caller gives no limit
    #[serde(default = "default_history_default_limit")]
    pub history_default_limit: usize,
    /// Upper bound on the history limit a caller may request
    #[serde(default = "default_history_max_limit")]
    pub history_max_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            history_default_limit: default_history_default_limit(),
            history_max_limit: default_history_max_limit(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_history_default_limit() -> usize {
    20
}

fn default_history_max_limit() -> usize {
    100
}

/// Upstream chat completion API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the OpenAI-compatible API; requests go to `{api_url}/chat/completions`
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Environment variable holding the bearer credential
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,
    /// System role message placed before the user's question
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Sampling temperature (provider default when unset)
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate (provider default when unset)
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Connection establishment timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Longest tolerated silence between two upstream chunks, in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            temperature: None,
            max_tokens: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    60
}

/// History storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Directory holding the LanceDB history table
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".askstream"))
        .unwrap_or_else(|| PathBuf::from(".askstream"))
}
