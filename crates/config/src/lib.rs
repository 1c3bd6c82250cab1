//! Configuration loading, validation, and management for LearnPath.
//!
//! Loads configuration from `~/.learnpath/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.learnpath/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Anthropic API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Language model settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Tool server (MCP) settings
    #[serde(default)]
    pub tool_server: ToolServerConfig,

    /// Startup retry policy for the tool channel
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Per-user history and compaction
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Tool-call loop bounds
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Scheduled batch agent
    #[serde(default)]
    pub batch: BatchConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
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
            .field("model", &self.model)
            .field("tool_server", &self.tool_server)
            .field("bootstrap", &self.bootstrap)
            .field("conversation", &self.conversation)
            .field("orchestrator", &self.orchestrator)
            .field("batch", &self.batch)
            .field("gateway", &self.gateway)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Token budget for compaction summaries
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

fn default_model_name() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_api_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_summary_max_tokens() -> u32 {
    500
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            api_url: default_api_url(),
            max_tokens: default_max_tokens(),
            summary_max_tokens: default_summary_max_tokens(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    #[serde(default = "default_tool_server_url")]
    pub url: String,

    /// Per-request HTTP timeout for JSON-RPC calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_tool_server_url() -> String {
    "http://localhost:3000/mcp".into()
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            url: default_tool_server_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,

    /// Exit the process when the tool server never comes up. When false the
    /// HTTP gateway still starts and answers 503 on chat routes.
    #[serde(default = "default_true")]
    pub exit_on_failure: bool,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_backoff_factor() -> f64 {
    1.5
}
fn default_true() -> bool {
    true
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: None,
            exit_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// History length above which the oldest turns are summarized
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,

    /// First turn of every history. `{user_id}` is substituted.
    #[serde(default = "default_system_directive")]
    pub system_directive: String,
}

fn default_compaction_threshold() -> usize {
    5
}
fn default_system_directive() -> String {
    "You are a personal learning coach helping user {user_id} track their learning activities.

When a user tells you what they learned or worked on:
1. Extract domains/topics mentioned (e.g., DSA, System Design, React, Backend, etc.)
2. Ask 2-3 clarifying questions to gather complete information
3. When the conversation feels complete and you have all details:
   - Call saveMultipleDomains with all domain names mentioned
   - Call saveEntry with a complete summary of what they did
   - Confirm the entry was saved successfully

Be conversational and helpful. Only save when you have complete information."
        .into()
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: default_compaction_threshold(),
            system_directive: default_system_directive(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum tool-execution rounds per request
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_max_rounds() -> u32 {
    10
}
fn default_model_timeout_secs() -> u64 {
    120
}
fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            model_timeout_secs: default_model_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 5-field cron expression, evaluated in UTC
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Users always included in a batch run, on top of users seen in chat
    #[serde(default)]
    pub users: Vec<i64>,

    /// How far back the summary window reaches
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    /// Operator directive. `{user_id}`, `{start_date}` and `{end_date}` are substituted.
    #[serde(default = "default_batch_directive")]
    pub directive: String,
}

fn default_schedule() -> String {
    "0 18 * * 0".into()
}
fn default_lookback_days() -> i64 {
    7
}
fn default_batch_directive() -> String {
    "You are a learning coach. Generate a detailed weekly summary for user {user_id}:

1. Get all domains for the user using getAllDomainsofUser
2. For each domain, fetch entries from the past 7 days using getEntriesByDomain with startDate {start_date} and endDate {end_date}
3. Analyze patterns: what went well, what was challenging
4. Generate personalized recommendations for next week
5. Provide encouragement and insights

Be thorough and insightful. Use the available tools to gather data."
        .into()
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_schedule(),
            users: Vec::new(),
            lookback_days: default_lookback_days(),
            directive: default_batch_directive(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    3001
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.learnpath/config.toml).
    ///
    /// Environment variables override the file:
    /// - `ANTHROPIC_API_KEY`, then `LEARNPATH_API_KEY`
    /// - `MCP_SERVER_URL`
    /// - `LEARNPATH_MODEL`
    /// - `PORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("ANTHROPIC_API_KEY").or_else(|| lookup("LEARNPATH_API_KEY")) {
            self.api_key = Some(key);
        }

        if let Some(url) = lookup("MCP_SERVER_URL") {
            self.tool_server.url = url;
        }

        if let Some(model) = lookup("LEARNPATH_MODEL") {
            self.model.name = model;
        }

        if let Some(port) = lookup("PORT") {
            self.gateway.port = port
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("PORT is not a valid port: {port}")))?;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".learnpath")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.model.temperature
            && !(0.0..=1.0).contains(&t)
        {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 1.0".into(),
            ));
        }

        if self.bootstrap.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "bootstrap.max_attempts must be at least 1".into(),
            ));
        }

        let factor = self.bootstrap.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(ConfigError::ValidationError(
                "bootstrap.backoff_factor must be a finite number >= 1.0".into(),
            ));
        }

        if self.conversation.compaction_threshold < 2 {
            return Err(ConfigError::ValidationError(
                "conversation.compaction_threshold must be at least 2".into(),
            ));
        }

        if self.orchestrator.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_rounds must be at least 1".into(),
            ));
        }

        if self.batch.lookback_days <= 0 {
            return Err(ConfigError::ValidationError(
                "batch.lookback_days must be positive".into(),
            ));
        }

        if self.batch.schedule.split_whitespace().count() != 5 {
            return Err(ConfigError::ValidationError(format!(
                "batch.schedule must have 5 fields: {}",
                self.batch.schedule
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: ModelConfig::default(),
            tool_server: ToolServerConfig::default(),
            bootstrap: BootstrapConfig::default(),
            conversation: ConversationConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            batch: BatchConfig::default(),
            gateway: GatewayConfig::default(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.name, "claude-sonnet-4-20250514");
        assert_eq!(config.tool_server.url, "http://localhost:3000/mcp");
        assert_eq!(config.conversation.compaction_threshold, 5);
        assert_eq!(config.orchestrator.max_rounds, 10);
        assert_eq!(config.batch.schedule, "0 18 * * 0");
        assert!((config.bootstrap.backoff_factor - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.name, config.model.name);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.batch.directive, config.batch.directive);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[tool_server]
url = "http://tools.internal:9000/mcp"

[batch]
users = [1, 2, 3]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tool_server.url, "http://tools.internal:9000/mcp");
        assert_eq!(config.tool_server.request_timeout_secs, 30);
        assert_eq!(config.batch.users, vec![1, 2, 3]);
        assert_eq!(config.batch.lookback_days, 7);
        assert_eq!(config.model.max_tokens, 2048);
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = AppConfig::default();
        config.bootstrap.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_finite_backoff_rejected() {
        for factor in [f64::NAN, f64::INFINITY, 0.9] {
            let mut config = AppConfig::default();
            config.bootstrap.backoff_factor = factor;
            assert!(config.validate().is_err(), "factor {factor}");
        }

        let toml_str = "[bootstrap]\nbackoff_factor = nan\n";
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_schedule_rejected() {
        let mut config = AppConfig::default();
        config.batch.schedule = "0 18 * *".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.gateway.port, 3001);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[orchestrator]\nmax_rounds = 4\n\n[gateway]\nport = 8080"
        )
        .unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.orchestrator.max_rounds, 4);
        assert_eq!(config.gateway.port, 8080);
    }

    #[test]
    fn unparseable_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway\nport = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("ANTHROPIC_API_KEY", "sk-ant-test"),
                ("MCP_SERVER_URL", "http://127.0.0.1:4000/mcp"),
                ("LEARNPATH_MODEL", "claude-3-5-haiku-latest"),
                ("PORT", "9090"),
            ]))
            .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-ant-test"));
        assert_eq!(config.tool_server.url, "http://127.0.0.1:4000/mcp");
        assert_eq!(config.model.name, "claude-3-5-haiku-latest");
        assert_eq!(config.gateway.port, 9090);
    }

    #[test]
    fn anthropic_key_wins_over_learnpath_key() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("ANTHROPIC_API_KEY", "primary"),
                ("LEARNPATH_API_KEY", "secondary"),
            ]))
            .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn invalid_port_env_rejected() {
        let mut config = AppConfig::default();
        let err = config.apply_env(env(&[("PORT", "not-a-port")])).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-ant-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-ant-secret"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("claude-sonnet-4-20250514"));
        assert!(toml_str.contains("0 18 * * 0"));
        assert!(!toml_str.contains("api_key"));
    }
}
