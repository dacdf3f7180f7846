//! Logical task domain model.
//!
//! A logical task is one end-to-end unit of agent work, from the accepted
//! inbound request to its single terminal outcome.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ports::InboundMessage;

/// Lifecycle state of a logical task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Task is executing (or paused waiting on peers)
    Working,
    /// Runtime reported normal completion
    Completed,
    /// Unhandled failure during execution
    Failed,
    /// Explicit cancellation
    Canceled,
    /// Runtime call budget exhausted
    LimitReached,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Working
    }
}

impl TaskState {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::LimitReached => "limit_reached",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Working)
    }

    /// Valid transitions from this state.
    pub fn valid_transitions(&self) -> Vec<TaskState> {
        match self {
            Self::Working => vec![
                Self::Completed,
                Self::Failed,
                Self::Canceled,
                Self::LimitReached,
            ],
            Self::Completed | Self::Failed | Self::Canceled | Self::LimitReached => vec![],
        }
    }

    /// Whether moving to `new_state` is allowed.
    pub fn can_transition_to(&self, new_state: Self) -> bool {
        self.valid_transitions().contains(&new_state)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the session backing a task outlives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionBehavior {
    /// History persists across tasks; text is streamed incrementally.
    #[serde(rename = "PERSISTENT", alias = "persistent")]
    Persistent,
    /// Ephemeral session created for one task and deleted afterwards;
    /// text is aggregated and returned in the terminal response.
    #[serde(rename = "RUN_BASED", alias = "run_based")]
    RunBased,
}

impl Default for SessionBehavior {
    fn default() -> Self {
        Self::Persistent
    }
}

impl SessionBehavior {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persistent => "PERSISTENT",
            Self::RunBased => "RUN_BASED",
        }
    }

    /// Parse the wire form (`PERSISTENT` / `RUN_BASED`, case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PERSISTENT" => Some(Self::Persistent),
            "RUN_BASED" => Some(Self::RunBased),
            _ => None,
        }
    }
}

/// Session identifiers captured when the request was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Session owner.
    pub user_id: String,
    /// Session id supplied by the caller
    pub session_id: String,
    /// Session the runtime actually runs in (differs for run-based tasks)
    pub effective_session_id: String,
}

impl SessionContext {
    /// Context whose effective session is the caller's session.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            user_id: user_id.into(),
            effective_session_id: session_id.clone(),
            session_id,
        }
    }

    /// Run in a different session than the caller supplied.
    pub fn with_effective_session(mut self, effective_session_id: impl Into<String>) -> Self {
        self.effective_session_id = effective_session_id.into();
        self
    }
}

/// A versioned artifact produced or returned by a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Artifact file name.
    pub filename: String,
    /// `None` means "latest"
    pub version: Option<u32>,
}

impl ArtifactRef {
    /// Reference to `filename` at `version`.
    pub fn new(filename: impl Into<String>, version: Option<u32>) -> Self {
        Self {
            filename: filename.into(),
            version,
        }
    }
}

/// Routing information taken from the inbound request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOrigin {
    /// Echoed on every response.
    pub jsonrpc_request_id: Option<serde_json::Value>,
    /// Requesting client.
    pub client_id: String,
    /// Explicit reply topic; falls back to the client topic.
    pub reply_to_topic: Option<String>,
    /// Explicit status topic; falls back to the gateway topic.
    pub status_topic: Option<String>,
    /// Opaque user configuration forwarded to peers.
    pub user_config: Option<serde_json::Value>,
}

/// One unit of agent work tracked by the engine.
#[derive(Clone)]
pub struct LogicalTask {
    /// Task id chosen by the requester.
    pub id: String,
    /// Hosting agent.
    pub agent_name: String,
    /// Session identifiers.
    pub session: SessionContext,
    /// Where responses go.
    pub origin: TaskOrigin,
    /// Whether the session outlives the task.
    pub session_behavior: SessionBehavior,
    /// Whether text is streamed as status updates.
    pub is_streaming: bool,
    /// Originating inbound message; settled exactly once at finalization.
    pub inbound: Option<Arc<dyn InboundMessage>>,
    /// When the request was accepted.
    pub created_at: DateTime<Utc>,
}

impl LogicalTask {
    /// Streaming, persistent task with default origin.
    pub fn new(
        id: impl Into<String>,
        agent_name: impl Into<String>,
        session: SessionContext,
    ) -> Self {
        Self {
            id: id.into(),
            agent_name: agent_name.into(),
            session,
            origin: TaskOrigin::default(),
            session_behavior: SessionBehavior::default(),
            is_streaming: true,
            inbound: None,
            created_at: Utc::now(),
        }
    }

    /// Set the origin.
    pub fn with_origin(mut self, origin: TaskOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Set the session behavior.
    pub fn with_session_behavior(mut self, behavior: SessionBehavior) -> Self {
        self.session_behavior = behavior;
        self
    }

    /// Enable or disable streaming.
    pub fn with_streaming(mut self, is_streaming: bool) -> Self {
        self.is_streaming = is_streaming;
        self
    }

    /// Attach the inbound message to settle at finalization.
    pub fn with_inbound(mut self, inbound: Arc<dyn InboundMessage>) -> Self {
        self.inbound = Some(inbound);
        self
    }

    /// Whether the session is deleted when the task ends.
    pub fn is_run_based(&self) -> bool {
        self.session_behavior == SessionBehavior::RunBased
    }
}

impl fmt::Debug for LogicalTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalTask")
            .field("id", &self.id)
            .field("agent_name", &self.agent_name)
            .field("session", &self.session)
            .field("origin", &self.origin)
            .field("session_behavior", &self.session_behavior)
            .field("is_streaming", &self.is_streaming)
            .field("has_inbound", &self.inbound.is_some())
            .field("created_at", &self.created_at)
            .finish()
    }
}
