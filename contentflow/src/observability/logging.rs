//! Structured logging setup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::errors::ContentflowError;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV_VAR: &str = "CONTENTFLOW_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Enable colored output (text format only).
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels.
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            color: default_true(),
            modules: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Builds the filter directive string: level first, then module overrides.
    #[must_use]
    pub fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(self.modules.iter().map(|(module, level)| format!("{module}={level}")))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ContentflowError> {
    if let Ok(from_env) = std::env::var(LOG_ENV_VAR) {
        return EnvFilter::try_new(&from_env)
            .map_err(|e| ContentflowError::Config(format!("Invalid {LOG_ENV_VAR} value '{from_env}': {e}")));
    }
    EnvFilter::try_new(config.directives())
        .map_err(|e| ContentflowError::Config(format!("Invalid log filter '{}': {e}", config.directives())))
}

/// Installs the global `tracing` subscriber.
///
/// `CONTENTFLOW_LOG` takes precedence over the configured level and module
/// directives.
///
/// # Errors
///
/// Returns `ContentflowError::Config` if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ContentflowError> {
    let filter = build_env_filter(config)?;
    let registry = Registry::default().with(filter);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_ansi(config.color))
            .try_init(),
    };

    installed.map_err(|e| ContentflowError::Config(format!("Failed to install subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Text);
        assert!(config.color);
    }

    #[test]
    fn test_directives_include_modules() {
        let mut config = LoggingConfig::default();
        config.modules.insert("contentflow::pipeline".into(), "debug".into());
        assert_eq!(config.directives(), "info,contentflow::pipeline=debug");
    }

    #[test]
    fn test_global_subscriber_installs_once() {
        let config = LoggingConfig {
            format: LogFormat::Json,
            ..LoggingConfig::default()
        };
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config: LoggingConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
    }
}
