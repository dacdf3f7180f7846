//! Layered configuration loading.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `agent_name` is blank.
    #[error("agent_name cannot be empty")]
    EmptyAgentName,

    /// `namespace` is blank.
    #[error("namespace cannot be empty")]
    EmptyNamespace,

    /// Peer timeout below one second.
    #[error("Invalid inter_agent.request_timeout_seconds: {0}. Must be at least 1")]
    InvalidRequestTimeout(u64),

    /// Call budget of zero.
    #[error("Invalid max_llm_calls_per_task: {0}. Must be at least 1")]
    InvalidMaxLlmCalls(u32),

    /// Unknown log level.
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Unknown log format.
    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    /// Unknown rotation policy.
    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    /// Any other invalid value.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. weft.yaml (project config)
    /// 3. .weft/local.yaml (local overrides, optional)
    /// 4. Environment variables (WEFT_* prefix, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("weft.yaml"))
            .merge(Yaml::file(".weft/local.yaml"))
            .merge(Env::prefixed("WEFT_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, on top of the defaults
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.agent_name.trim().is_empty() {
            return Err(ConfigError::EmptyAgentName);
        }
        if config.agent_name.contains('/') {
            return Err(ConfigError::ValidationFailed(format!(
                "agent_name '{}' cannot contain '/'",
                config.agent_name
            )));
        }

        if config.namespace.trim().is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }

        if config.inter_agent.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidRequestTimeout(
                config.inter_agent.request_timeout_seconds,
            ));
        }

        if config.max_llm_calls_per_task == 0 {
            return Err(ConfigError::InvalidMaxLlmCalls(config.max_llm_calls_per_task));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        Ok(())
    }
}
