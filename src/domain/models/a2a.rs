//! Agent-to-Agent (A2A) wire shapes.
//!
//! JSON-RPC 2.0 envelopes plus the task, status and artifact payloads
//! exchanged with peers and with the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::task::{SessionBehavior, TaskState};

/// Protocol version stamped on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC method used to delegate a task to a peer.
pub const METHOD_SEND_TASK: &str = "tasks/send";

/// JSON-RPC method used to cancel a peer task.
pub const METHOD_CANCEL_TASK: &str = "tasks/cancel";

/// JSON-RPC internal error code.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// JSON-RPC request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest<P> {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request id; delegation requests use the sub-task id.
    pub id: Value,
    /// `tasks/send` or `tasks/cancel`.
    pub method: String,
    /// Method parameters.
    pub params: P,
}

impl<P> JsonRpcRequest<P> {
    /// Build a request envelope for `method`.
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: P) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Structured detail such as `reason` and `taskId`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// An internal error (`-32603`) with structured `data`.
    pub fn internal(message: impl Into<String>, data: Value) -> Self {
        Self {
            code: INTERNAL_ERROR_CODE,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// JSON-RPC response envelope carrying either a result or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse<R> {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request being answered.
    #[serde(default)]
    pub id: Option<Value>,
    /// Present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl<R> JsonRpcResponse<R> {
    /// Response carrying `result`.
    pub fn success(id: Option<Value>, result: R) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Response carrying `error`.
    pub fn failure(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The requesting user or a calling agent.
    User,
    /// This agent.
    Agent,
}

/// File content, either inline (base64) or by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContent {
    /// File name.
    pub name: String,
    /// MIME type of the content.
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64-encoded content when inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
    /// Artifact URI when sent by reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// A message part on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    /// Plain text.
    Text {
        /// The text.
        text: String,
        /// Optional part metadata.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    /// Structured JSON, such as a status signal or a tool result.
    Data {
        /// The payload.
        data: Value,
        /// Optional part metadata, e.g. `tool_name`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    /// A file, inline or by reference.
    File {
        /// The file.
        file: FileContent,
    },
}

impl Part {
    /// Text part without metadata.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            metadata: None,
        }
    }

    /// Data part without metadata.
    pub fn data(data: Value) -> Self {
        Self::Data {
            data,
            metadata: None,
        }
    }

    /// Data part with metadata.
    pub fn data_with_metadata(data: Value, metadata: Map<String, Value>) -> Self {
        Self::Data {
            data,
            metadata: Some(metadata),
        }
    }
}

/// A message exchanged between user and agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author.
    pub role: Role,
    /// Ordered content parts.
    pub parts: Vec<Part>,
}

impl Message {
    /// Agent-authored message.
    pub fn agent(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Agent,
            parts,
        }
    }

    /// User message with a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenation of the text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Payloads of the data parts, in order.
    pub fn data_parts(&self) -> Vec<Value> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Data { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }
}

/// State of a task at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Current state.
    pub state: TaskState,
    /// Message accompanying the state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// When the status was produced.
    pub timestamp: DateTime<Utc>,
}

impl TaskStatus {
    /// Status stamped now.
    pub fn new(state: TaskState, message: Message) -> Self {
        Self {
            state,
            message: Some(message),
            timestamp: Utc::now(),
        }
    }
}

/// Metadata attached to a delegation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationMetadata {
    /// How the peer should treat the session.
    #[serde(rename = "sessionBehavior")]
    pub session_behavior: SessionBehavior,
    /// Delegating task.
    #[serde(rename = "parentTaskId")]
    pub parent_task_id: String,
    /// Function call this delegation answers.
    pub function_call_id: String,
}

/// Params of a delegation request: `{id, sessionId, message, metadata}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRequest {
    /// Sub-task id.
    pub id: String,
    /// Session id of the delegating task.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Message built from the tool call arguments.
    pub message: Message,
    /// Correlation metadata.
    pub metadata: DelegationMetadata,
}

/// Params of a cancellation request: `{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Sub-task to cancel.
    pub id: String,
}

/// Intermediate status: `{id, status, final, metadata}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Task the update belongs to.
    pub id: String,
    /// New status.
    pub status: TaskStatus,
    /// Whether this is the last update.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Free-form metadata such as `invocation_id`.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A named piece of output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact file name.
    pub name: String,
    /// Content parts.
    pub parts: Vec<Part>,
}

/// Artifact update: `{id, artifact}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactUpdate {
    /// Task the artifact belongs to.
    pub id: String,
    /// The artifact.
    pub artifact: Artifact,
}

/// Terminal task: `{id, sessionId, status, artifacts, metadata}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalTask {
    /// Task id.
    pub id: String,
    /// Client-facing session id.
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    /// Terminal status.
    pub status: TaskStatus,
    /// Artifacts attached to the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,
    /// Includes `agent_name` and `produced_artifacts`.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}
