//! Layered relay configuration.
//!
//! Defaults are overlaid by the TOML file, then by `RELAY_*` environment
//! variables. Command-line flags are applied last by the binary.

use super::env::{EnvError, EnvParser};
use crate::logging::{LogConfig, LogFormat};
use crate::types::ForwardingTarget;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default coordinator API base URL.
pub const DEFAULT_COORDINATOR_URL: &str = "http://localhost:8081/v1";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid environment: {}", format_env_errors(.0))]
    Env(Vec<EnvError>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No bearer token configured (set RELAY_TOKEN, --token or coordinator.token_file)")]
    MissingToken,

    #[error("Failed to read token file {path}: {source}")]
    TokenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn format_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub target: ForwardingTarget,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// API base URL, e.g. `https://api.example.com/v1`.
    #[serde(default = "default_coordinator_url")]
    pub url: String,
    /// Bearer token. Prefer `token_file` or `RELAY_TOKEN` over storing it here.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    /// File holding the bearer token.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Timeout for each coordinator call (ms).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: default_coordinator_url(),
            token: None,
            token_file: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl CoordinatorConfig {
    /// Resolve the bearer token from the inline value or the token file.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = self.token.as_deref().map(str::trim)
            && !token.is_empty()
        {
            return Ok(token.to_string());
        }
        if let Some(path) = &self.token_file {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::TokenFile {
                path: path.clone(),
                source,
            })?;
            let token = raw.trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        }
        Err(ConfigError::MissingToken)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Polling cadence in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// No sooner than this between cycles.
    #[serde(default = "default_interval_min")]
    pub interval_min_ms: u64,
    /// Added to the delay after each empty cycle.
    #[serde(default = "default_interval_step")]
    pub interval_step_ms: u64,
    /// Idle backoff ceiling.
    #[serde(default = "default_interval_max")]
    pub interval_max_ms: u64,
    /// Added to the delay after each failed poll.
    #[serde(default = "default_fault_step")]
    pub fault_step_ms: u64,
    /// Fault backoff ceiling.
    #[serde(default = "default_fault_max")]
    pub fault_max_ms: u64,
    /// Re-check period while paused.
    #[serde(default = "default_paused_interval")]
    pub paused_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_min_ms: default_interval_min(),
            interval_step_ms: default_interval_step(),
            interval_max_ms: default_interval_max(),
            fault_step_ms: default_fault_step(),
            fault_max_ms: default_fault_max(),
            paused_interval_ms: default_paused_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Upper bound for one replay, connect through last body byte (ms).
    #[serde(default = "default_replay_timeout")]
    pub timeout_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_replay_timeout(),
        }
    }
}

impl ReplayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write logs to this file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> LogConfig {
        let mut config = LogConfig::new(&self.level).with_format(self.format);
        if let Some(file) = &self.file {
            config = config.with_file(file.clone());
        }
        config
    }
}

fn default_coordinator_url() -> String {
    DEFAULT_COORDINATOR_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_interval_min() -> u64 {
    50
}

fn default_interval_step() -> u64 {
    50
}

fn default_interval_max() -> u64 {
    2000
}

fn default_fault_step() -> u64 {
    5000
}

fn default_fault_max() -> u64 {
    15_000
}

fn default_paused_interval() -> u64 {
    2500
}

fn default_replay_timeout() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Platform config file location (`<config dir>/relay/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "relay").map(|dirs| dirs.config_dir().join("config.toml"))
}

impl RelayConfig {
    /// Parse a TOML document.
    pub fn from_toml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration from `path`, or from the platform default when it
    /// exists, then overlay the environment.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => match default_config_path() {
                Some(default) if default.exists() => Self::read_file(&default)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        let mut parser = EnvParser::new();
        config.apply_env(&mut parser);
        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml(&raw, path)
    }

    /// Overlay `RELAY_*` environment variables.
    pub fn apply_env(&mut self, env: &mut EnvParser) {
        if let Some(url) = env.get_string("COORDINATOR_URL") {
            self.coordinator.url = url;
        }
        if let Some(token) = env.get_string("TOKEN") {
            self.coordinator.token = Some(token);
        }
        if let Some(path) = env.get_path("TOKEN_FILE") {
            self.coordinator.token_file = Some(path);
        }
        if let Some(site) = env.get_string("SITE") {
            self.target.site = site;
        }
        if let Some(host) = env.get_string("HOST") {
            self.target.host = host.to_lowercase();
        }
        if let Some(port) = env.get_u16_range("PORT", 1, u16::MAX) {
            self.target.port = port;
        }
        if let Some(provider) = env.get_provider("PROVIDER") {
            self.target.provider = provider;
        }
        if let Some(verify) = env.get_bool("VERIFY_TLS") {
            self.target.verify_tls = verify;
        }
        if let Some(timeout) = env.get_u64_range("REPLAY_TIMEOUT_MS", 1, 3_600_000) {
            self.replay.timeout_ms = timeout;
        }
        if let Some(level) = env.get_log_level("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env.get_log_format("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(file) = env.get_path("LOG_FILE") {
            self.logging.file = Some(file);
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.coordinator.url.to_lowercase();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "coordinator.url must start with http:// or https://, got '{}'",
                self.coordinator.url
            )));
        }
        if self.target.site.trim().is_empty() {
            return Err(ConfigError::Invalid("target.site is required".to_string()));
        }
        if self.target.host.trim().is_empty() {
            return Err(ConfigError::Invalid("target.host is empty".to_string()));
        }
        if self.target.port == 0 {
            return Err(ConfigError::Invalid(
                "target.port must be between 1 and 65535".to_string(),
            ));
        }
        let polling = &self.polling;
        if polling.interval_min_ms == 0 || polling.interval_min_ms > polling.interval_max_ms {
            return Err(ConfigError::Invalid(format!(
                "polling interval range is inverted ({}..{})",
                polling.interval_min_ms, polling.interval_max_ms
            )));
        }
        if polling.fault_step_ms == 0 || polling.fault_step_ms > polling.fault_max_ms {
            return Err(ConfigError::Invalid(format!(
                "polling fault range is inverted ({}..{})",
                polling.fault_step_ms, polling.fault_max_ms
            )));
        }
        if polling.paused_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "polling.paused_interval_ms must be positive".to_string(),
            ));
        }
        if self.replay.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "replay.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
