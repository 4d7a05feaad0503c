//! Configuration system for the relay.
//!
//! This module provides:
//! - TOML file loading from an explicit path or the platform config dir
//! - Environment variable parsing with type safety (`RELAY_*`)
//! - Validation on startup

pub mod env;
pub mod settings;

pub use env::{EnvError, EnvParser};
pub use settings::{
    ConfigError, CoordinatorConfig, DEFAULT_COORDINATOR_URL, LoggingConfig, PollingConfig,
    RelayConfig, ReplayConfig, default_config_path,
};
