//! Logger settings resolved from the `logging` config section.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::models::config::LoggingConfig;

/// Resolved logger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_format")]
    pub format: LogFormat,

    /// Directory for log files (optional, if None logs only to stdout)
    pub log_dir: Option<PathBuf>,

    /// Also write to stdout
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Log file rotation
    #[serde(default)]
    pub rotation: RotationPolicy,
}

/// Log line format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable
    Pretty,
}

/// When the log file rolls over
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    /// New file every day
    #[default]
    Daily,
    /// New file every hour
    Hourly,
    /// Single file
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::default(),
        }
    }
}

/// Validated `logging` section of the agent config. Unknown values fall back
/// to the defaults; `ConfigLoader::validate` has rejected them already.
impl From<&LoggingConfig> for LogConfig {
    fn from(logging: &LoggingConfig) -> Self {
        let format = match logging.format.as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        };
        let rotation = match logging.rotation.as_str() {
            "hourly" => RotationPolicy::Hourly,
            "never" => RotationPolicy::Never,
            _ => RotationPolicy::Daily,
        };
        Self {
            level: logging.level.clone(),
            format,
            log_dir: logging.log_dir.as_ref().map(PathBuf::from),
            enable_stdout: true,
            rotation,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> LogFormat {
    LogFormat::Json
}

fn default_true() -> bool {
    true
}
