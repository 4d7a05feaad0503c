//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for `RELAY_` environment variables with
//! validation and error collection, so every bad variable is reported at once.

use crate::logging::LogFormat;
use crate::types::Provider;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
///
/// Every getter returns `None` when the variable is unset and records an
/// error (returning `None`) when it is set to something unusable.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    /// Create a new parser with the RELAY_ prefix.
    pub fn new() -> Self {
        Self {
            prefix: "RELAY_",
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Get the full variable name with prefix.
    pub fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, name: &str) -> Option<(String, String)> {
        let var_name = self.var_name(name);
        env::var(&var_name).ok().map(|value| (var_name, value))
    }

    /// Get a non-empty string value.
    pub fn get_string(&mut self, name: &str) -> Option<String> {
        self.raw(name)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Get a path value.
    pub fn get_path(&mut self, name: &str) -> Option<PathBuf> {
        self.get_string(name).map(PathBuf::from)
    }

    /// Get a boolean value.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str) -> Option<bool> {
        let (var_name, value) = self.raw(name)?;
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "boolean (true/false/1/0/yes/no/on/off)".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get a u16 value with range validation.
    pub fn get_u16_range(&mut self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.get_u64_range(name, u64::from(min), u64::from(max))
            .and_then(|n| u16::try_from(n).ok())
    }

    /// Get a u64 value with range validation.
    pub fn get_u64_range(&mut self, name: &str, min: u64, max: u64) -> Option<u64> {
        let (var_name, value) = self.raw(name)?;
        match value.trim().parse::<u64>() {
            Ok(n) if n >= min && n <= max => Some(n),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                None
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned integer".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get a forwarding provider (http/https).
    pub fn get_provider(&mut self, name: &str) -> Option<Provider> {
        let (var_name, value) = self.raw(name)?;
        match value.parse::<Provider>() {
            Ok(provider) => Some(provider),
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "http or https".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get a log level (trace, debug, info, warn, error).
    pub fn get_log_level(&mut self, name: &str) -> Option<String> {
        let (var_name, value) = self.raw(name)?;
        let level = value.trim().to_lowercase();
        match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Some(level),
            _ => {
                self.errors.push(EnvError::InvalidLogLevel {
                    var: var_name,
                    value,
                });
                None
            }
        }
    }

    /// Get a log output format (pretty/json).
    pub fn get_log_format(&mut self, name: &str) -> Option<LogFormat> {
        let (var_name, value) = self.raw(name)?;
        match value.parse::<LogFormat>() {
            Ok(format) => Some(format),
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "pretty or json".to_string(),
                    value,
                });
                None
            }
        }
    }
}
