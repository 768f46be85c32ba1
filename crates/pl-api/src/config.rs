use std::path::Path;

use pl_runtime::EnvironmentOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::partition::DEFAULT_CAPACITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for one run of a script over a point set.
///
/// ```toml
/// [environment]
/// strict_variables = true
/// max_call_levels = 64
///
/// [runner]
/// capacity = 50000
/// on_failure = "skip"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BridgeConfig {
    pub environment: EnvironmentConfig,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EnvironmentConfig {
    pub strict_variables: bool,
    pub max_call_levels: Option<usize>,
    /// Inline Rhai source defining `format_exception(kind, value, trace)`.
    pub formatter_source: Option<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            strict_variables: true,
            max_call_levels: None,
            formatter_source: None,
        }
    }
}

impl EnvironmentConfig {
    pub fn to_options(&self) -> EnvironmentOptions {
        EnvironmentOptions {
            strict_variables: self.strict_variables,
            max_call_levels: self.max_call_levels,
            formatter_source: self.formatter_source.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RunnerConfig {
    /// Maximum number of points per chunk.
    pub capacity: usize,
    pub on_failure: FailurePolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            on_failure: FailurePolicy::default(),
        }
    }
}

/// What the runner does when a chunk fails on its own (bind-time
/// configuration errors and script runtime failures).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Abort,
    Skip,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.capacity == 0 {
            return Err(ConfigError::Invalid(
                "runner.capacity must be greater than zero".to_string(),
            ));
        }
        if self.environment.max_call_levels == Some(0) {
            return Err(ConfigError::Invalid(
                "environment.max_call_levels must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.runner.capacity = capacity;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.runner.on_failure = policy;
        self
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_pipeline() {
        let config = BridgeConfig::default();
        assert_eq!(config.runner.capacity, 100_000);
        assert_eq!(config.runner.on_failure, FailurePolicy::Abort);
        assert!(config.environment.strict_variables);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [environment]
            strict_variables = false
            max_call_levels = 32

            [runner]
            capacity = 500
            on_failure = "skip"
            "#,
        )
        .expect("config");
        assert_eq!(config.runner.capacity, 500);
        assert_eq!(config.runner.on_failure, FailurePolicy::Skip);

        let options = config.environment.to_options();
        assert!(!options.strict_variables);
        assert_eq!(options.max_call_levels, Some(32));
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config = BridgeConfig::from_toml_str("[runner]\ncapacity = 10\n").expect("config");
        assert_eq!(config.runner.on_failure, FailurePolicy::Abort);
        assert_eq!(config.environment, EnvironmentConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let error = BridgeConfig::from_toml_str("[runner]\ncapacity = 0\n").expect_err("zero");
        assert!(matches!(error, ConfigError::Invalid(_)));

        let error =
            BridgeConfig::from_toml_str("[runner]\non_failure = \"retry\"\n").expect_err("policy");
        assert!(matches!(error, ConfigError::Toml(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let error = BridgeConfig::load("/nonexistent/plang.toml").expect_err("missing");
        assert!(matches!(error, ConfigError::Io(_)));
    }

    #[test]
    fn builders_update_runner_settings() {
        let config = BridgeConfig::new()
            .with_capacity(7)
            .with_failure_policy(FailurePolicy::Skip);
        assert_eq!(config.runner.capacity, 7);
        assert_eq!(config.runner.on_failure, FailurePolicy::Skip);
    }
}
