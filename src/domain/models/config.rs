//! Agent host configuration model.

use serde::{Deserialize, Serialize};

use super::task::SessionBehavior;

/// Main configuration structure for a weft agent host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Owning agent identity; also a topic component
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// Topic namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Gateway used for the status topic fallback (defaults to the agent name)
    #[serde(default)]
    pub gateway_id: Option<String>,

    /// Advertised streaming capability
    #[serde(default = "default_true")]
    pub supports_streaming: bool,

    /// Byte length at which the streaming buffer is flushed; 0 disables batching
    #[serde(default)]
    pub stream_batching_threshold_bytes: i64,

    /// Session behavior for requests that do not specify one
    #[serde(default)]
    pub default_session_behavior: SessionBehavior,

    /// How returned artifacts are attached to status updates
    #[serde(default)]
    pub artifact_handling_mode: ArtifactHandlingMode,

    /// Peer delegation settings
    #[serde(default)]
    pub inter_agent: InterAgentConfig,

    /// Runtime call budget per task
    #[serde(default = "default_max_llm_calls")]
    pub max_llm_calls_per_task: u32,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_agent_name() -> String {
    "weft-agent".to_string()
}

fn default_namespace() -> String {
    "weft".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_max_llm_calls() -> u32 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
            namespace: default_namespace(),
            gateway_id: None,
            supports_streaming: true,
            stream_batching_threshold_bytes: 0,
            default_session_behavior: SessionBehavior::default(),
            artifact_handling_mode: ArtifactHandlingMode::default(),
            inter_agent: InterAgentConfig::default(),
            max_llm_calls_per_task: default_max_llm_calls(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Gateway id, or the agent name when none is configured.
    pub fn effective_gateway_id(&self) -> &str {
        self.gateway_id.as_deref().unwrap_or(&self.agent_name)
    }
}

/// How artifacts returned on a final event are attached to the outbound update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactHandlingMode {
    /// Do not publish returned artifacts
    #[default]
    Ignore,
    /// Inline content as base64
    Embed,
    /// `artifact://` URI reference
    Reference,
}

/// Peer delegation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InterAgentConfig {
    /// Seconds to wait for a peer before synthesizing a timeout result
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

const fn default_request_timeout_seconds() -> u64 {
    600
}

impl Default for InterAgentConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
