//! Finalization manager.
//!
//! Drives a task from WORKING to exactly one terminal state. Removal from the
//! registry is the gate: whoever removes the context finalizes, every later
//! attempt is a logged no-op. Each finalized task gets exactly one ack or nack.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::models::a2a::{
    JsonRpcError, JsonRpcResponse, Message, Part, TaskStatus, TerminalTask,
};
use crate::domain::models::{
    ContentPart, GenerationEvent, LogicalTask, TaskState, ToolResponse,
};
use crate::domain::ports::SessionStore;
use crate::services::outbound::{OutboundPublisher, TOOL_FAILURE_SIGNAL};
use crate::services::stream_processor::content_part_to_wire;
use crate::services::task_registry::{TaskExecutionContext, TaskRegistry};

/// Reply text for a cancelled task.
pub const CANCELED_MESSAGE: &str = "Task cancelled by request.";

/// Reply text for a failed task. The failure reason itself is only logged.
pub const FAILED_MESSAGE: &str = "An unexpected error occurred during tool execution. Please try your request again. If the problem persists, contact an administrator.";

/// Guidance returned when the LLM call limit is exhausted.
pub const LIMIT_REACHED_MESSAGE: &str = "This interaction has reached its processing limit. If you'd like to continue this conversation, please type 'continue'. Otherwise, you can start a new topic.";

/// `error.data.reason` of a limit-reached response.
pub const LIMIT_REACHED_REASON: &str = "llm_call_limit_reached";

/// Reply text when a persistent task finishes without any recorded event.
const COMPLETED_FALLBACK_MESSAGE: &str = "Task completed.";

const DELIVERY_FAILED_MESSAGE: &str = "Failed to deliver the final response for this task.";

const REPAIRED_CALL_MESSAGE: &str = "Tool execution was interrupted by an unexpected error.";

/// Why a task is being finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The runtime finished its last turn.
    Completed,
    /// `reason` is logged, never published
    Failed {
        /// Internal failure detail.
        reason: String,
    },
    /// Cancelled by request or by the runtime.
    Canceled,
    /// The LLM call limit was exceeded.
    LimitReached,
}

impl TaskOutcome {
    /// Task state published for this outcome.
    pub fn terminal_state(&self) -> TaskState {
        match self {
            Self::Completed => TaskState::Completed,
            Self::Failed { .. } => TaskState::Failed,
            Self::Canceled => TaskState::Canceled,
            Self::LimitReached => TaskState::LimitReached,
        }
    }
}

/// How the inbound request message was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processed; the broker may drop it.
    Acked,
    /// Rejected for redelivery or dead-lettering.
    Nacked,
}

/// Result of a finalization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReport {
    /// This call finalized the task.
    Finalized {
        /// Terminal state that was published.
        state: TaskState,
        /// Ack or nack of the inbound message.
        settlement: Settlement,
    },
    /// Someone else already finalized the task
    AlreadyFinalized,
    /// Task is waiting on delegated tools; nothing was done
    Paused,
}

/// Publishes terminal responses and settles inbound messages.
pub struct FinalizationManager {
    registry: Arc<TaskRegistry>,
    publisher: Arc<OutboundPublisher>,
    sessions: Arc<dyn SessionStore>,
}

impl FinalizationManager {
    /// Create a manager gating on `registry` removal.
    pub fn new(
        registry: Arc<TaskRegistry>,
        publisher: Arc<OutboundPublisher>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            registry,
            publisher,
            sessions,
        }
    }

    /// Finalize `task_id` with `outcome`.
    #[instrument(skip(self), fields(state = %outcome.terminal_state()))]
    pub async fn finalize(&self, task_id: &str, outcome: TaskOutcome) -> FinalizeReport {
        if outcome == TaskOutcome::Completed {
            if let Some(ctx) = self.registry.get(task_id).await {
                if ctx.is_paused().await {
                    info!("Task paused for delegated tools; skipping finalization");
                    return FinalizeReport::Paused;
                }
            }
        }

        let Some(ctx) = self.registry.remove(task_id).await else {
            warn!("Task already finalized; ignoring");
            return FinalizeReport::AlreadyFinalized;
        };

        let report = match outcome {
            TaskOutcome::Completed => self.complete(&ctx).await,
            TaskOutcome::Failed { reason } => self.fail(&ctx, &reason).await,
            TaskOutcome::Canceled => self.cancel(&ctx).await,
            TaskOutcome::LimitReached => self.limit_reached(&ctx).await,
        };

        self.cleanup(&ctx).await;
        info!(report = ?report, "Task finalized");
        report
    }

    async fn complete(&self, ctx: &TaskExecutionContext) -> FinalizeReport {
        let task = ctx.task();
        let terminal = self.completed_task(ctx).await;
        let response = JsonRpcResponse::success(task.origin.jsonrpc_request_id.clone(), terminal);
        match self.publisher.publish_reply(task, &response).await {
            Ok(()) => FinalizeReport::Finalized {
                state: TaskState::Completed,
                settlement: settle(task, Settlement::Acked),
            },
            Err(e) => {
                error!(error = %e, "Failed to publish completed response");
                self.delivery_failed(task).await
            }
        }
    }

    async fn fail(&self, ctx: &TaskExecutionContext, reason: &str) -> FinalizeReport {
        let task = ctx.task();
        error!(reason, "Task failed");
        self.repair_history(task).await;

        if let Err(e) = self
            .publisher
            .publish_signal(task, TOOL_FAILURE_SIGNAL, FAILED_MESSAGE)
            .await
        {
            warn!(error = %e, "Failed to publish tool-failure status");
        }
        let response = JsonRpcResponse::success(
            task.origin.jsonrpc_request_id.clone(),
            terminal_task(task, TaskState::Failed, vec![Part::text(FAILED_MESSAGE)], Map::new()),
        );
        if let Err(e) = self.publisher.publish_reply(task, &response).await {
            error!(error = %e, "Failed to publish failed response");
        }
        FinalizeReport::Finalized {
            state: TaskState::Failed,
            settlement: settle(task, Settlement::Nacked),
        }
    }

    async fn cancel(&self, ctx: &TaskExecutionContext) -> FinalizeReport {
        let task = ctx.task();
        let response = JsonRpcResponse::success(
            task.origin.jsonrpc_request_id.clone(),
            terminal_task(task, TaskState::Canceled, vec![Part::text(CANCELED_MESSAGE)], Map::new()),
        );
        match self.publisher.publish_reply(task, &response).await {
            Ok(()) => FinalizeReport::Finalized {
                state: TaskState::Canceled,
                settlement: settle(task, Settlement::Acked),
            },
            Err(e) => {
                error!(error = %e, "Failed to publish canceled response");
                self.delivery_failed(task).await
            }
        }
    }

    async fn limit_reached(&self, ctx: &TaskExecutionContext) -> FinalizeReport {
        let task = ctx.task();
        let response: JsonRpcResponse<TerminalTask> = JsonRpcResponse::failure(
            task.origin.jsonrpc_request_id.clone(),
            JsonRpcError::internal(
                LIMIT_REACHED_MESSAGE,
                json!({ "taskId": task.id, "reason": LIMIT_REACHED_REASON }),
            ),
        );
        match self.publisher.publish_reply(task, &response).await {
            Ok(()) => FinalizeReport::Finalized {
                state: TaskState::LimitReached,
                settlement: settle(task, Settlement::Acked),
            },
            Err(e) => {
                error!(error = %e, "Failed to publish limit-reached response");
                self.delivery_failed(task).await
            }
        }
    }

    /// Nack, then try to tell the caller something went wrong.
    async fn delivery_failed(&self, task: &LogicalTask) -> FinalizeReport {
        let settlement = settle(task, Settlement::Nacked);
        let response: JsonRpcResponse<Value> = JsonRpcResponse::failure(
            task.origin.jsonrpc_request_id.clone(),
            JsonRpcError::internal(DELIVERY_FAILED_MESSAGE, json!({ "taskId": task.id })),
        );
        if let Err(e) = self.publisher.publish_reply(task, &response).await {
            warn!(error = %e, "Best-effort error publish failed");
        }
        FinalizeReport::Finalized {
            state: TaskState::Failed,
            settlement,
        }
    }

    async fn completed_task(&self, ctx: &TaskExecutionContext) -> TerminalTask {
        let task = ctx.task();
        let (last_event, run_based_text, produced) = {
            let state = ctx.lock().await;
            (
                state.last_event.clone(),
                state.run_based_buffer.clone(),
                state.produced_artifacts.clone(),
            )
        };
        let last_event = match last_event {
            Some(event) => Some(event),
            None => self.stored_last_event(task).await,
        };

        let mut parts = Vec::new();
        if task.is_run_based() {
            if !run_based_text.is_empty() {
                parts.push(Part::text(run_based_text));
            }
            if let Some(event) = &last_event {
                parts.extend(
                    event
                        .content_parts
                        .iter()
                        .filter(|p| !p.is_text())
                        .filter_map(final_reply_part),
                );
            }
        } else if let Some(event) = &last_event {
            parts.extend(event.content_parts.iter().filter_map(final_reply_part));
            if parts.is_empty() {
                parts.push(Part::text(""));
            }
        } else {
            parts.push(Part::text(COMPLETED_FALLBACK_MESSAGE));
        }

        let mut metadata = Map::new();
        if !produced.is_empty() {
            metadata.insert("produced_artifacts".to_string(), json!(produced));
        }
        terminal_task(task, TaskState::Completed, parts, metadata)
    }

    async fn stored_last_event(&self, task: &LogicalTask) -> Option<GenerationEvent> {
        let session = &task.session;
        match self
            .sessions
            .last_event(&session.user_id, &session.effective_session_id)
            .await
        {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Could not read last session event");
                None
            }
        }
    }

    /// Answer any tool call left dangling at the end of history with an error,
    /// so the next turn sees a consistent conversation.
    async fn repair_history(&self, task: &LogicalTask) {
        let Some(last) = self.stored_last_event(task).await else {
            return;
        };
        let calls = last.function_calls();
        if calls.is_empty() {
            return;
        }
        let responses: Vec<ToolResponse> = calls
            .into_iter()
            .map(|call| ToolResponse {
                function_call_id: call.id,
                name: call.name,
                response: json!({ "status": "error", "message": REPAIRED_CALL_MESSAGE }),
            })
            .collect();
        let repaired = responses.len();
        let event = GenerationEvent::tool_responses(&last.invocation_id, &task.agent_name, responses);
        let session = &task.session;
        match self
            .sessions
            .append_event(&session.user_id, &session.effective_session_id, event)
            .await
        {
            Ok(()) => info!(repaired, "Repaired dangling tool calls in session history"),
            Err(e) => warn!(error = %e, "Session history repair failed"),
        }
    }

    async fn cleanup(&self, ctx: &TaskExecutionContext) {
        let task = ctx.task();
        if !task.is_run_based() {
            return;
        }
        let session = &task.session;
        match self
            .sessions
            .delete_session(&session.user_id, &session.effective_session_id)
            .await
        {
            Ok(()) => debug!(session_id = %session.effective_session_id, "Run-based session deleted"),
            Err(e) => warn!(error = %e, "Failed to delete run-based session"),
        }
    }
}

/// Wire form of a last-event part in the COMPLETED reply. Tool results keep
/// the producing tool's name; pending tool calls are not part of the answer.
fn final_reply_part(part: &ContentPart) -> Option<Part> {
    match part {
        ContentPart::Text { .. } | ContentPart::Data { .. } => Some(content_part_to_wire(part)),
        ContentPart::FunctionResponse { name, response, .. } => {
            let mut metadata = Map::new();
            metadata.insert("tool_name".to_string(), json!(name));
            Some(Part::data_with_metadata(response.clone(), metadata))
        }
        ContentPart::FunctionCall { .. } => None,
    }
}

fn terminal_task(
    task: &LogicalTask,
    state: TaskState,
    parts: Vec<Part>,
    mut metadata: Map<String, Value>,
) -> TerminalTask {
    metadata.insert("agent_name".to_string(), json!(task.agent_name));
    TerminalTask {
        id: task.id.clone(),
        session_id: Some(task.session.session_id.clone()),
        status: TaskStatus::new(state, Message::agent(parts)),
        artifacts: None,
        metadata,
    }
}

/// Ack or nack the task's inbound message.
fn settle(task: &LogicalTask, settlement: Settlement) -> Settlement {
    let Some(inbound) = &task.inbound else {
        debug!(task_id = %task.id, "No inbound message to settle");
        return settlement;
    };
    let result = match settlement {
        Settlement::Acked => inbound.ack(),
        Settlement::Nacked => inbound.nack(),
    };
    if let Err(e) = result {
        error!(task_id = %task.id, settlement = ?settlement, error = %e, "Failed to settle inbound message");
    }
    settlement
}
