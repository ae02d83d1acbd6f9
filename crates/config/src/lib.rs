//! Configuration loading, validation, and management for banter.
//!
//! Loads configuration from `~/.banter/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use banter_core::WindowUnit;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.banter/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default completion provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model reply
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Persona and house rules sent as the system turn
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Context window configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Retry and circuit breaker configuration
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// History store configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_system_prompt() -> String {
    "You are a friendly participant in a group chat. Reply briefly and naturally, \
     in the language of the last message. Never prefix replies with timestamps or names."
        .into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("providers", &self.providers)
            .field("context", &self.context)
            .field("resilience", &self.resilience)
            .field("history", &self.history)
            .field("logging", &self.logging)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// How much history fits into a prompt and how it is costed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for the whole prompt
    #[serde(default = "default_budget")]
    pub budget: usize,

    /// Fixed framing cost added per history unit
    #[serde(default = "default_per_unit_overhead")]
    pub per_unit_overhead: usize,

    /// How many recent entries to load from the history store
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Grouping of history into units
    #[serde(default)]
    pub unit: WindowUnit,

    /// Characters per token for the ratio estimator
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Fixed margin added to every ratio estimate
    #[serde(default = "default_token_margin")]
    pub token_margin: usize,

    /// `tokenizer.json` for exact counting (needs the `exact-tokenizer` feature)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_path: Option<PathBuf>,

    /// Prefix history turns with `[timestamp] role:speaker: `
    #[serde(default = "default_true")]
    pub frame_entries: bool,
}

fn default_budget() -> usize {
    3000
}
fn default_per_unit_overhead() -> usize {
    15
}
fn default_history_limit() -> usize {
    50
}
fn default_chars_per_token() -> usize {
    3
}
fn default_token_margin() -> usize {
    4
}
fn default_true() -> bool {
    true
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            per_unit_overhead: default_per_unit_overhead(),
            history_limit: default_history_limit(),
            unit: WindowUnit::default(),
            chars_per_token: default_chars_per_token(),
            token_margin: default_token_margin(),
            tokenizer_path: None,
            frame_entries: true,
        }
    }
}

/// Retry, backoff and circuit breaker settings for the completion backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Fraction of each backoff randomized (0.0–1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Per-attempt timeout when the caller sets no deadline
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial call
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,

    /// Concurrent trial calls allowed while half-open
    #[serde(default = "default_one")]
    pub half_open_max_calls: u32,

    /// Trial successes needed to close the circuit again
    #[serde(default = "default_one")]
    pub success_threshold: u32,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_backoff_ms() -> u64 {
    10_000
}
fn default_jitter() -> f64 {
    0.2
}
fn default_attempt_timeout_secs() -> u64 {
    60
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_secs() -> u64 {
    30
}
fn default_one() -> u32 {
    1
}

impl ResilienceConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_jitter(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
            half_open_max_calls: default_one(),
            success_threshold: default_one(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    /// Process-local, lost on exit
    Memory,
    /// SQLite database file
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub backend: HistoryBackend,

    /// Database path; defaults to `~/.banter/history.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl HistoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("history.db"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.banter/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `BANTER_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from a specific path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        // Environment variable overrides (highest priority)
        if config.api_key.is_none() {
            config.api_key = std::env::var("BANTER_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("BANTER_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("BANTER_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".banter")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(invalid("default_temperature must be between 0.0 and 2.0"));
        }

        if self.context.budget == 0 {
            return Err(invalid("context.budget must be > 0"));
        }
        if self.context.chars_per_token == 0 {
            return Err(invalid("context.chars_per_token must be >= 1"));
        }

        let r = &self.resilience;
        if r.max_attempts == 0 {
            return Err(invalid("resilience.max_attempts must be >= 1"));
        }
        if r.backoff_multiplier.is_nan() || r.backoff_multiplier < 1.0 {
            return Err(invalid("resilience.backoff_multiplier must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&r.jitter) {
            return Err(invalid("resilience.jitter must be between 0.0 and 1.0"));
        }
        if r.initial_backoff_ms > r.max_backoff_ms {
            return Err(invalid(
                "resilience.initial_backoff_ms must not exceed max_backoff_ms",
            ));
        }
        if r.attempt_timeout_secs == 0 {
            return Err(invalid("resilience.attempt_timeout_secs must be > 0"));
        }
        if r.failure_threshold == 0 || r.half_open_max_calls == 0 || r.success_threshold == 0 {
            return Err(invalid(
                "resilience.failure_threshold, half_open_max_calls and success_threshold must be >= 1",
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Model for the selected provider: its `[providers.<name>] default_model`
    /// when set, otherwise the top-level `default_model`.
    pub fn effective_model(&self) -> &str {
        self.providers
            .get(&self.default_provider)
            .and_then(|p| p.default_model.as_deref())
            .unwrap_or(&self.default_model)
    }

    /// Generate a default config TOML string (for `banter config --template`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            providers: HashMap::new(),
            context: ContextConfig::default(),
            resilience: ResilienceConfig::default(),
            history: HistoryConfig::default(),
            logging: LoggingConfig::default(),
        }
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

impl From<ConfigError> for banter_core::Error {
    fn from(err: ConfigError) -> Self {
        banter_core::Error::Config {
            message: err.to_string(),
        }
    }
}
