#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! [`EngineConfig`] groups the history limits and executor tunables so they
//! can be loaded from TOML or JSON at startup.
//!
//! ```toml
//! [history]
//! max_history = 100
//! max_memory_bytes = 52428800  # 0 = unlimited
//!
//! [executor]
//! effect_timeout_ms = 30000    # omit for no deadline
//! event_capacity = 256
//! ```
//!
//! ```rust,ignore
//! let config = EngineConfig::from_toml_file("redraft.toml")?;
//! let executor = Executor::try_new(config)?;
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::HistoryConfig;

/// Top-level engine configuration. Missing fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub history: HistoryConfig,
    pub executor: ExecutorConfig,
}

/// Executor tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Deadline for a single leaf effect, in milliseconds. `None` disables it.
    pub effect_timeout_ms: Option<u64>,
    /// Buffer size of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            effect_timeout_ms: Some(30_000),
            event_capacity: 256,
        }
    }
}

impl ExecutorConfig {
    #[must_use]
    pub fn effect_timeout(&self) -> Option<Duration> {
        self.effect_timeout_ms.map(Duration::from_millis)
    }
}

impl EngineConfig {
    /// Load from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Load from a file, picking the format by extension (`.json`, else TOML).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_file(path)
        } else {
            Self::from_toml_file(path)
        }
    }

    /// Validate all parameters are within acceptable ranges.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.history.max_history == 0 {
            errors.push("history.max_history must be > 0".into());
        }

        if self.executor.effect_timeout_ms == Some(0) {
            errors.push("executor.effect_timeout_ms must be > 0 when set".into());
        }

        if self.executor.event_capacity == 0 {
            errors.push("executor.event_capacity must be > 0".into());
        }

        errors
    }

    /// Validate, turning any problems into [`ConfigError::Invalid`].
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

/// Errors that can occur when loading an engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[source] toml::de::Error),
    #[error("JSON parse error: {0}")]
    Json(#[source] serde_json::Error),
    #[error("validation errors: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.history.max_history, 100);
        assert_eq!(config.history.max_memory_bytes, 52_428_800);
        assert_eq!(
            config.executor.effect_timeout(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.executor.event_capacity, 256);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [history]
            max_history = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.history.max_history, 5);
        assert_eq!(config.history.max_memory_bytes, 52_428_800);
        assert_eq!(config.executor, ExecutorConfig::default());
    }

    #[test]
    fn json_round_trip() {
        let mut config = EngineConfig::default();
        config.executor.effect_timeout_ms = None;
        let json = serde_json::to_string(&config).unwrap();
        let parsed = EngineConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.executor.effect_timeout(), None);
    }

    #[test]
    fn validate_catches_zero_history() {
        let mut config = EngineConfig::default();
        config.history.max_history = 0;
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("max_history"));
    }

    #[test]
    fn validate_catches_zero_timeout_and_capacity() {
        let mut config = EngineConfig::default();
        config.executor.effect_timeout_ms = Some(0);
        config.executor.event_capacity = 0;
        assert_eq!(config.validate().len(), 2);
        assert!(matches!(
            config.validated(),
            Err(ConfigError::Invalid(errors)) if errors.len() == 2
        ));
    }

    #[test]
    fn zero_memory_budget_is_valid() {
        let mut config = EngineConfig::default();
        config.history.max_memory_bytes = 0;
        assert!(config.validate().is_empty());
    }

    #[test]
    fn bad_toml_reports_parse_error() {
        let err = EngineConfig::from_toml_str("[history\nmax_history = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
        assert!(err.to_string().starts_with("TOML parse error"));
    }

    #[test]
    fn from_file_picks_format_by_extension() {
        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(json, r#"{{"history": {{"max_history": 7}}}}"#).unwrap();
        assert_eq!(
            EngineConfig::from_file(json.path()).unwrap().history.max_history,
            7
        );

        let mut toml = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(toml, "[executor]\nevent_capacity = 8\n").unwrap();
        assert_eq!(
            EngineConfig::from_file(toml.path())
                .unwrap()
                .executor
                .event_capacity,
            8
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = EngineConfig::from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
