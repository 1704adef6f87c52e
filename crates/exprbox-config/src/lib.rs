#![warn(missing_docs)]

//! # exprbox-config
//!
//! Configuration loading for exprbox bridges and evaluator pools.
//!
//! Supports TOML configuration files with environment variable expansion.
//! Every section and key is optional; missing values fall back to the
//! defaults of [`BridgeConfig`] and [`PoolConfig`].
//!
//! ## Example
//!
//! ```toml
//! [bridge]
//! memory_limit_mb = 128
//! timeout_ms = 5000
//! debug = false
//!
//! [pool]
//! workers = ${EXPRBOX_WORKERS}
//! ```

use std::path::Path;
use std::time::Duration;

use exprbox_sandbox::{BridgeConfig, PoolConfig};
use serde::Deserialize;
use thiserror::Error;

/// Smallest heap ceiling accepted for an isolate, in megabytes.
pub const MIN_MEMORY_LIMIT_MB: usize = 8;

/// Errors from config parsing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level exprbox configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExprboxConfig {
    /// Isolate settings shared by every bridge.
    #[serde(default)]
    pub bridge: BridgeOverrides,

    /// Evaluator pool settings.
    #[serde(default)]
    pub pool: PoolOverrides,
}

/// Bridge configuration overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeOverrides {
    /// V8 heap ceiling in megabytes.
    #[serde(default)]
    pub memory_limit_mb: Option<usize>,

    /// Default per-call timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Install a guest console that forwards into host logging.
    #[serde(default)]
    pub debug: Option<bool>,
}

/// Pool configuration overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolOverrides {
    /// Number of worker threads, one isolate each.
    #[serde(default)]
    pub workers: Option<usize>,
}

impl ExprboxConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: ExprboxConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loaded exprbox config");
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loaded exprbox config");
        Self::from_toml_with_env(&content)
    }

    /// Bridge settings with defaults filled in.
    pub fn bridge_config(&self) -> BridgeConfig {
        let defaults = BridgeConfig::default();
        BridgeConfig {
            memory_limit_mb: self.bridge.memory_limit_mb.unwrap_or(defaults.memory_limit_mb),
            timeout: self
                .bridge
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            debug: self.bridge.debug.unwrap_or(defaults.debug),
        }
    }

    /// Pool settings with defaults filled in.
    pub fn pool_config(&self) -> PoolConfig {
        let defaults = PoolConfig::default();
        PoolConfig {
            workers: self.pool.workers.unwrap_or(defaults.workers),
            bridge: self.bridge_config(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(mb) = self.bridge.memory_limit_mb {
            if mb < MIN_MEMORY_LIMIT_MB {
                return Err(ConfigError::Invalid(format!(
                    "bridge.memory_limit_mb must be at least {MIN_MEMORY_LIMIT_MB}, got {mb}"
                )));
            }
        }
        if self.bridge.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "bridge.timeout_ms must be greater than 0".into(),
            ));
        }
        if self.pool.workers == Some(0) {
            return Err(ConfigError::Invalid(
                "pool.workers must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
///
/// A quoted placeholder that is the whole TOML value (`"${N}"`) is replaced
/// including its quotes when the variable holds a number or boolean, so
/// numeric keys can come from the environment.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => {
                    let bare = is_bare_scalar(&value);
                    if bare && result.ends_with('"') && chars.peek() == Some(&'"') {
                        result.pop();
                        chars.next();
                    }
                    result.push_str(&value);
                }
                // Unresolved placeholders stay as written.
                Err(_) => result.push_str(&format!("${{{var_name}}}")),
            }
        } else {
            result.push(ch);
        }
    }

    result
}

fn is_bare_scalar(value: &str) -> bool {
    value == "true" || value == "false" || (!value.is_empty() && value.parse::<f64>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_parses_full_example() {
        let toml = r#"
            [bridge]
            memory_limit_mb = 64
            timeout_ms = 250
            debug = true

            [pool]
            workers = 3
        "#;

        let config = ExprboxConfig::from_toml(toml).unwrap();
        assert_eq!(config.bridge.memory_limit_mb, Some(64));
        assert_eq!(config.bridge.timeout_ms, Some(250));
        assert_eq!(config.bridge.debug, Some(true));
        assert_eq!(config.pool.workers, Some(3));

        let pool = config.pool_config();
        assert_eq!(pool.workers, 3);
        assert_eq!(pool.bridge.memory_limit_mb, 64);
        assert_eq!(pool.bridge.timeout, Duration::from_millis(250));
        assert!(pool.bridge.debug);
    }

    #[test]
    fn config_uses_defaults_when_absent() {
        let config = ExprboxConfig::from_toml("").unwrap();
        assert_eq!(config, ExprboxConfig::default());
        assert_eq!(config.bridge_config(), BridgeConfig::default());
        assert!(config.pool_config().workers >= 1);
    }

    #[test]
    fn partial_bridge_section_keeps_other_defaults() {
        let config = ExprboxConfig::from_toml("[bridge]\ntimeout_ms = 100\n").unwrap();
        let bridge = config.bridge_config();
        assert_eq!(bridge.timeout, Duration::from_millis(100));
        assert_eq!(bridge.memory_limit_mb, 128);
        assert!(!bridge.debug);
    }

    #[test]
    fn config_rejects_tiny_heap() {
        let err = ExprboxConfig::from_toml("[bridge]\nmemory_limit_mb = 4\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("memory_limit_mb"), "{err}");
    }

    #[test]
    fn config_rejects_zero_timeout() {
        let err = ExprboxConfig::from_toml("[bridge]\ntimeout_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("timeout_ms"), "{err}");
    }

    #[test]
    fn config_rejects_zero_workers() {
        let err = ExprboxConfig::from_toml("[pool]\nworkers = 0\n").unwrap_err();
        assert!(err.to_string().contains("workers"), "{err}");
    }

    #[test]
    fn config_rejects_unknown_keys() {
        let err = ExprboxConfig::from_toml("[bridge]\nheap = 12\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn config_expands_environment_variables() {
        std::env::set_var("EXPRBOX_TEST_WORKERS", "6");
        std::env::set_var("EXPRBOX_TEST_DEBUG", "true");
        let toml = r#"
            [bridge]
            debug = "${EXPRBOX_TEST_DEBUG}"
            [pool]
            workers = "${EXPRBOX_TEST_WORKERS}"
        "#;

        let config = ExprboxConfig::from_toml_with_env(toml).unwrap();
        assert_eq!(config.pool.workers, Some(6));
        assert_eq!(config.bridge.debug, Some(true));
        std::env::remove_var("EXPRBOX_TEST_WORKERS");
        std::env::remove_var("EXPRBOX_TEST_DEBUG");
    }

    #[test]
    fn config_expands_unquoted_placeholders() {
        std::env::set_var("EXPRBOX_TEST_POOL_WORKERS", "3");
        let toml = "[pool]\nworkers = ${EXPRBOX_TEST_POOL_WORKERS}\n";
        let config = ExprboxConfig::from_toml_with_env(toml).unwrap();
        assert_eq!(config.pool.workers, Some(3));
        std::env::remove_var("EXPRBOX_TEST_POOL_WORKERS");
    }

    #[test]
    fn env_var_expansion_preserves_unresolved() {
        let result = expand_env_vars("prefix ${DEFINITELY_NOT_SET_12345} suffix");
        assert_eq!(result, "prefix ${DEFINITELY_NOT_SET_12345} suffix");
    }

    #[test]
    fn env_var_expansion_keeps_quotes_for_text() {
        std::env::set_var("EXPRBOX_TEST_TEXT", "hello");
        assert_eq!(expand_env_vars(r#"x = "${EXPRBOX_TEST_TEXT}""#), r#"x = "hello""#);
        std::env::remove_var("EXPRBOX_TEST_TEXT");
    }

    #[test]
    fn env_var_expansion_handles_no_vars() {
        let result = expand_env_vars("no variables here");
        assert_eq!(result, "no variables here");
    }

    #[test]
    fn config_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pool]\nworkers = 2").unwrap();

        let config = ExprboxConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pool.workers, Some(2));
    }

    #[test]
    fn config_loads_from_file_with_env() {
        std::env::set_var("EXPRBOX_TEST_TIMEOUT", "750");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bridge]\ntimeout_ms = ${{EXPRBOX_TEST_TIMEOUT}}").unwrap();

        let config = ExprboxConfig::from_file_with_env(file.path()).unwrap();
        assert_eq!(config.bridge.timeout_ms, Some(750));
        std::env::remove_var("EXPRBOX_TEST_TIMEOUT");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExprboxConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
