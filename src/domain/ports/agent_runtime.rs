//! Agent runtime port - the generation engine driving a task.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::errors::RuntimeError;
use crate::domain::models::a2a::Message;
use crate::domain::models::{GenerationEvent, SessionContext, ToolResponse};

/// Events of one runtime turn, in emission order. The channel closes when
/// the turn ends; an `Err` item ends it abnormally.
pub type EventStream = mpsc::Receiver<Result<GenerationEvent, RuntimeError>>;

/// Input for a fresh runtime turn.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Task the turn belongs to.
    pub task_id: String,
    /// Session the runtime runs in.
    pub session: SessionContext,
    /// User input.
    pub message: Message,
    /// Call budget; exceeding it ends the turn with `LimitExceeded`.
    pub max_llm_calls: u32,
}

/// Generation engine that turns messages into event streams.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Start a turn for a newly accepted task.
    async fn run(&self, request: RunRequest) -> Result<EventStream, RuntimeError>;

    /// Continue a paused session after its delegated tool calls were answered.
    ///
    /// Called exactly once per resolved invocation group.
    async fn resume(
        &self,
        task_id: &str,
        session: &SessionContext,
        responses: Vec<ToolResponse>,
        max_llm_calls: u32,
    ) -> Result<EventStream, RuntimeError>;
}
