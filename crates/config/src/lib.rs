//! Configuration loading, validation, and management for DeepSearch.
//!
//! Loads configuration from `~/.deepsearch/config.toml` (or an explicit
//! path) with environment variable overrides. Validates all settings at
//! startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.deepsearch/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Daily request quota
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Agent loop settings (model, step bound, system prompt)
    #[serde(default)]
    pub agent: AgentConfig,

    /// Model provider endpoint
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Web search provider endpoint
    #[serde(default)]
    pub search: SearchConfig,

    /// Persistence backend for users and request records
    #[serde(default)]
    pub store: StoreConfig,

    /// Bearer tokens accepted by the gateway
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,

    /// Users seeded into the store at startup
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("gateway", &self.gateway)
            .field("quota", &self.quota)
            .field("agent", &self.agent)
            .field("provider", &self.provider)
            .field("search", &self.search)
            .field("store", &self.store)
            .field("sessions", &self.sessions.len())
            .field("users", &self.users)
            .finish()
    }
}

/// Wire encoding of the chat response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormat {
    /// Prefixed line protocol understood by the chat UI (`0:"text"\n`).
    #[default]
    DataStream,
    /// Server-sent events.
    Sse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub stream_format: StreamFormat,

    /// Wall-clock budget for one chat request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    3000
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_body_limit_bytes() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            stream_format: StreamFormat::default(),
            request_timeout_secs: default_request_timeout_secs(),
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

/// Per-user request quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Requests a non-admin user may make per local day.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u64,
}

fn default_daily_limit() -> u64 {
    1
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to a web \
search tool. Use the searchWeb tool to find current, accurate information before answering \
questions about recent events or facts you are unsure of. Always cite your sources with inline \
links in markdown format [text](url). Be comprehensive in your research and provide multiple \
sources when available.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Maximum model calls per request.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Capacity of the event channel between the loop and the response body.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_steps() -> u32 {
    10
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}
fn default_event_buffer() -> usize {
    32
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            max_steps: default_max_steps(),
            system_prompt: default_system_prompt(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Model provider endpoint and credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider label used in logs
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// OpenAI-compatible base URL
    #[serde(default = "default_provider_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_provider_url() -> String {
    "https://api.openai.com/v1".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_url: default_provider_url(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_search_url() -> String {
    "https://google.serper.dev/search".into()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_url: default_search_url(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// SQLite database path (ignored by the memory backend)
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    AppConfig::config_dir()
        .join("deepsearch.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

/// A bearer token and the user it authenticates.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub token: String,
    pub user_id: String,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: String,

    #[serde(default)]
    pub is_admin: bool,
}

impl AppConfig {
    /// Load configuration from the default path (~/.deepsearch/config.toml).
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file path, then apply environment
    /// overrides:
    /// - `DEEPSEARCH_API_KEY` / `OPENAI_API_KEY`: model provider key
    /// - `SERPER_API_KEY`: search provider key
    /// - `DEEPSEARCH_MODEL`: model name
    /// - `DEEPSEARCH_DAILY_LIMIT`: quota per user per day
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            Self::from_toml(&content).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if self.provider.api_key.is_none() {
            self.provider.api_key = var("DEEPSEARCH_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        }
        if self.search.api_key.is_none() {
            self.search.api_key = var("SERPER_API_KEY");
        }
        if let Some(model) = var("DEEPSEARCH_MODEL") {
            self.agent.model = model;
        }
        if let Some(limit) = var("DEEPSEARCH_DAILY_LIMIT") {
            self.quota.daily_limit = limit.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "DEEPSEARCH_DAILY_LIMIT must be a non-negative integer, got '{limit}'"
                ))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deepsearch")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }
        if self.agent.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "agent.event_buffer must be at least 1".into(),
            ));
        }
        if self.gateway.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.request_timeout_secs must be at least 1".into(),
            ));
        }
        for session in &self.sessions {
            if session.token.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "session for user '{}' has an empty token",
                    session.user_id
                )));
            }
        }
        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quota.daily_limit, 1);
        assert_eq!(config.agent.max_steps, 10);
        assert_eq!(config.gateway.request_timeout_secs, 60);
        assert_eq!(config.gateway.stream_format, StreamFormat::DataStream);
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = AppConfig::default_toml();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.gateway.port, 3000);
        assert_eq!(parsed.agent.model, "gpt-4o-mini");
    }

    #[test]
    fn parses_sessions_users_and_limits() {
        let config = AppConfig::from_toml(
            r#"
            [quota]
            daily_limit = 5

            [gateway]
            stream_format = "sse"

            [store]
            backend = "memory"

            [[sessions]]
            token = "tok-alice"
            user_id = "alice"

            [[users]]
            id = "alice"

            [[users]]
            id = "root"
            is_admin = true
            "#,
        )
        .unwrap();

        assert_eq!(config.quota.daily_limit, 5);
        assert_eq!(config.gateway.stream_format, StreamFormat::Sse);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.sessions[0].user_id, "alice");
        assert!(!config.users[0].is_admin);
        assert!(config.users[1].is_admin);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.agent.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_steps_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_fill_missing_keys() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-test"),
            ("SERPER_API_KEY", "serper-test"),
            ("DEEPSEARCH_DAILY_LIMIT", "3"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.provider.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.search.api_key.as_deref(), Some("serper-test"));
        assert_eq!(config.quota.daily_limit, 3);
    }

    #[test]
    fn bad_daily_limit_env_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|k| (k == "DEEPSEARCH_DAILY_LIMIT").then(|| "lots".into()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nmax_steps = 4\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.max_steps, 4);
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-very-secret".into());
        config.sessions.push(SessionConfig {
            token: "session-secret".into(),
            user_id: "alice".into(),
        });
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(!debug.contains("session-secret"));
    }
}
