//! Domain errors for the weft orchestration engine.

use thiserror::Error;

/// Failures raised by the message transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The broker rejected a publish.
    #[error("Failed to publish to {topic}: {reason}")]
    PublishFailed {
        /// Destination topic.
        topic: String,
        /// Broker-reported cause.
        reason: String,
    },

    /// Ack or nack failed.
    #[error("Failed to settle inbound message: {0}")]
    AckFailed(String),

    /// The transport was shut down.
    #[error("Transport is closed")]
    Closed,
}

/// Outcomes reported by the agent runtime that end a run abnormally.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The per-task LLM call budget ran out.
    #[error("LLM call limit of {max_calls} exceeded")]
    LimitExceeded {
        /// The exhausted budget.
        max_calls: u32,
    },

    /// The runtime stopped the run on request.
    #[error("Run was cancelled")]
    Cancelled,

    /// A tool raised an error the runtime could not recover from.
    #[error("Tool execution failed: {0}")]
    ToolFailure(String),

    /// The session to run or resume does not exist.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Any other runtime failure.
    #[error("Runtime error: {0}")]
    Other(String),
}

/// Malformed early-embed bodies. Always recovered locally by the stream processor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbedError {
    /// Version is not a non-negative integer.
    #[error("Invalid artifact version in embed: {0}")]
    InvalidArtifactVersion(String),

    /// Unknown datetime format specifier.
    #[error("Invalid datetime format in embed: {0}")]
    InvalidDateFormat(String),

    /// `[[ARTIFACT:]]` without a name.
    #[error("Artifact embed is missing a filename")]
    EmptyArtifactName,
}

/// Crate-level error for orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// A task with this id is already in flight.
    #[error("Task already exists: {0}")]
    TaskAlreadyExists(String),

    /// No in-flight task has this id.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Runtime failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Session store failure.
    #[error("Session store error: {0}")]
    Session(String),

    /// Artifact store failure.
    #[error("Artifact store error: {0}")]
    Artifact(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The scheduler thread is gone or never started.
    #[error("Scheduler is not running")]
    SchedulerUnavailable,
}

/// Result alias for orchestration operations.
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
