//! Delegation coordinator.
//!
//! Turns peer tool calls into outbound sub-task requests and guarantees each
//! sub-task completes exactly once. A peer response and a cache expiry race
//! through [`DelegationCoordinator::claim`]; whoever removes the correlation
//! from the owning context wins, the other path becomes a no-op.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{OrchestrationError, OrchestrationResult, RuntimeError};
use crate::domain::models::a2a::{
    CancelRequest, DelegationMetadata, DelegationRequest, JsonRpcRequest, JsonRpcResponse, Message,
    Part, StatusUpdate, TerminalTask, METHOD_CANCEL_TASK, METHOD_SEND_TASK,
};
use crate::domain::models::delegation::{is_sub_task_id, new_sub_task_id, peer_name_from_tool};
use crate::domain::models::topics::{agent_request_topic, peer_response_topic, peer_status_topic};
use crate::domain::models::{
    FunctionCall, ParallelInvocationGroup, PeerOutcome, PeerResult, ResolvedInvocation,
    SessionBehavior, SubTaskCorrelation, TaskState,
};
use crate::domain::ports::{CacheExpiry, ExpiringCache, MessageProperties};
use crate::services::outbound::OutboundPublisher;
use crate::services::task_registry::{TaskExecutionContext, TaskRegistry};

/// A peer tool call ready to be delegated.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerCall {
    /// Target peer agent.
    pub peer_name: String,
    /// Runtime function call being answered.
    pub function_call_id: String,
    /// The `peer_*` tool name.
    pub tool_name: String,
    /// Message sent to the peer.
    pub message: Message,
}

impl PeerCall {
    /// Build from a runtime function call; `None` unless it targets a peer.
    pub fn from_function_call(call: &FunctionCall) -> Option<Self> {
        let peer_name = peer_name_from_tool(&call.name)?;
        let text = match call.args.get("task_description").and_then(Value::as_str) {
            Some(description) => description.to_string(),
            None => call.args.to_string(),
        };
        Some(Self {
            peer_name: peer_name.to_string(),
            function_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            message: Message::user_text(text),
        })
    }
}

/// Sends peer requests and correlates replies and timeouts back to paused invocations.
///
/// Every sub-task is claimed exactly once; only the claimer contributes its result.
pub struct DelegationCoordinator {
    registry: Arc<TaskRegistry>,
    publisher: Arc<OutboundPublisher>,
    cache: Arc<dyn ExpiringCache>,
    default_timeout: Duration,
}

impl DelegationCoordinator {
    /// Coordinator using `default_timeout` for sub-tasks without an explicit one.
    pub fn new(
        registry: Arc<TaskRegistry>,
        publisher: Arc<OutboundPublisher>,
        cache: Arc<dyn ExpiringCache>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            publisher,
            cache,
            default_timeout,
        }
    }

    /// Delegate one call to a peer and return the new sub-task id.
    ///
    /// Correlation state is recorded before the request goes out so that a
    /// fast reply always finds it; a failed publish rolls all of it back.
    ///
    /// # Errors
    /// `TaskNotFound` if the parent is gone, `Runtime(Cancelled)` if it was
    /// cancelled, `Transport` if the request could not be published.
    #[instrument(skip(self, call), fields(peer = %call.peer_name, function_call_id = %call.function_call_id))]
    pub async fn submit(
        &self,
        call: PeerCall,
        parent_task_id: &str,
        invocation_id: &str,
        timeout: Option<Duration>,
    ) -> OrchestrationResult<String> {
        let ctx = self
            .registry
            .get(parent_task_id)
            .await
            .ok_or_else(|| OrchestrationError::TaskNotFound(parent_task_id.to_string()))?;
        if ctx.is_cancelled() {
            return Err(RuntimeError::Cancelled.into());
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        let sub_task_id = new_sub_task_id();
        let task = ctx.task();
        let correlation = SubTaskCorrelation {
            sub_task_id: sub_task_id.clone(),
            parent_task_id: parent_task_id.to_string(),
            invocation_id: invocation_id.to_string(),
            peer_name: call.peer_name.clone(),
            function_call_id: call.function_call_id.clone(),
            tool_name: call.tool_name.clone(),
            session: task.session.clone(),
            submitted_at: Utc::now(),
            timeout,
        };

        {
            let mut state = ctx.lock().await;
            state.sub_tasks.insert(sub_task_id.clone(), correlation);
            state
                .invocations
                .entry(invocation_id.to_string())
                .or_insert_with(|| ParallelInvocationGroup::new(invocation_id))
                .register_submission();
        }
        self.cache.put(&sub_task_id, parent_task_id, timeout);

        let namespace = self.publisher.namespace();
        let agent_name = self.publisher.agent_name();
        let request = JsonRpcRequest::new(
            sub_task_id.clone(),
            METHOD_SEND_TASK,
            DelegationRequest {
                id: sub_task_id.clone(),
                session_id: task.session.session_id.clone(),
                message: call.message,
                metadata: DelegationMetadata {
                    session_behavior: SessionBehavior::RunBased,
                    parent_task_id: parent_task_id.to_string(),
                    function_call_id: call.function_call_id,
                },
            },
        );
        let mut properties = MessageProperties::new();
        properties.insert(
            "replyTo".to_string(),
            json!(peer_response_topic(namespace, agent_name, &sub_task_id)),
        );
        properties.insert(
            "a2aStatusTopic".to_string(),
            json!(peer_status_topic(namespace, agent_name, &sub_task_id)),
        );
        properties.insert("userId".to_string(), json!(task.session.user_id));
        if let Some(user_config) = &task.origin.user_config {
            properties.insert("a2aUserConfig".to_string(), user_config.clone());
        }

        let topic = agent_request_topic(namespace, &call.peer_name);
        if let Err(e) = self.publisher.publish_request(&topic, &request, properties).await {
            warn!(sub_task_id = %sub_task_id, error = %e, "Delegation publish failed, rolling back");
            self.cache.remove(&sub_task_id);
            let mut state = ctx.lock().await;
            state.sub_tasks.remove(&sub_task_id);
            if let Some(group) = state.invocations.get_mut(invocation_id) {
                group.withdraw_submission();
                if group.is_empty() {
                    state.invocations.remove(invocation_id);
                }
            }
            return Err(e.into());
        }

        info!(sub_task_id = %sub_task_id, invocation_id, timeout_secs = timeout.as_secs(), "Sub-task delegated");
        Ok(sub_task_id)
    }

    /// Record a peer call that could not be delegated as an immediate error result.
    pub async fn record_local_failure(
        &self,
        parent_task_id: &str,
        invocation_id: &str,
        call: &PeerCall,
        message: &str,
    ) -> Option<ResolvedInvocation> {
        let ctx = self.registry.get(parent_task_id).await?;
        let result = PeerResult {
            sub_task_id: String::new(),
            peer_name: call.peer_name.clone(),
            function_call_id: call.function_call_id.clone(),
            tool_name: call.tool_name.clone(),
            outcome: PeerOutcome::Error,
            payload: json!({ "status": "error", "message": message }),
        };
        ctx.lock()
            .await
            .invocations
            .entry(invocation_id.to_string())
            .or_insert_with(|| ParallelInvocationGroup::new(invocation_id))
            .register_submission();
        self.record_result(&ctx, invocation_id, result).await
    }

    /// Mark the fan-out for `invocation_id` fully submitted.
    ///
    /// Returns the resolution if every sub-task already completed.
    pub async fn seal(&self, task_id: &str, invocation_id: &str) -> Option<ResolvedInvocation> {
        let ctx = self.registry.get(task_id).await?;
        let mut state = ctx.lock().await;
        let group = state.invocations.get_mut(invocation_id)?;
        group.seal();
        debug!(task_id, invocation_id, expected = group.expected_count, "Invocation group sealed");
        let results = group.try_resolve()?;
        state.invocations.remove(invocation_id);
        Some(ResolvedInvocation {
            task_id: task_id.to_string(),
            invocation_id: invocation_id.to_string(),
            results,
        })
    }

    /// Atomically take ownership of a sub-task's completion.
    ///
    /// `parent_task_id_hint` comes from the expiry payload on the timeout path;
    /// the response path resolves the parent through the cache. Returns `None`
    /// when the sub-task was already claimed or its parent is gone.
    #[instrument(skip(self))]
    pub async fn claim(
        &self,
        sub_task_id: &str,
        parent_task_id_hint: Option<&str>,
    ) -> Option<SubTaskCorrelation> {
        let parent_task_id = match parent_task_id_hint {
            Some(hint) => hint.to_string(),
            None => {
                let Some(parent) = self.cache.get(sub_task_id) else {
                    info!("No correlation entry; sub-task already claimed or unknown");
                    return None;
                };
                parent
            }
        };

        let Some(ctx) = self.registry.get(&parent_task_id).await else {
            warn!(parent_task_id = %parent_task_id, "Parent task no longer active; ignoring stale sub-task");
            self.cache.remove(sub_task_id);
            return None;
        };

        let mut state = ctx.lock().await;
        match state.sub_tasks.remove(sub_task_id) {
            Some(correlation) => {
                self.cache.remove(sub_task_id);
                debug!(parent_task_id = %parent_task_id, "Sub-task claimed");
                Some(correlation)
            }
            None => {
                info!(parent_task_id = %parent_task_id, "Sub-task already claimed");
                None
            }
        }
    }

    /// Non-destructive lookup used to forward intermediate peer status.
    pub async fn peek(&self, sub_task_id: &str) -> Option<SubTaskCorrelation> {
        let parent_task_id = self.cache.get(sub_task_id)?;
        let ctx = self.registry.get(&parent_task_id).await?;
        let state = ctx.lock().await;
        state.sub_tasks.get(sub_task_id).cloned()
    }

    /// Response path: claim, interpret the peer's reply and record it.
    #[instrument(skip(self, payload))]
    pub async fn handle_peer_response(
        &self,
        sub_task_id: &str,
        payload: &Value,
    ) -> Option<ResolvedInvocation> {
        let correlation = self.claim(sub_task_id, None).await?;
        let result = peer_result_from_reply(&correlation, payload);
        info!(
            peer = %correlation.peer_name,
            outcome = ?result.outcome,
            "Peer response recorded"
        );
        let ctx = self.registry.get(&correlation.parent_task_id).await?;
        self.record_result(&ctx, &correlation.invocation_id, result).await
    }

    /// Timeout path: claim, cancel the peer's task and record a timeout result.
    #[instrument(skip(self, expiry), fields(sub_task_id = %expiry.key))]
    pub async fn handle_expiry(&self, expiry: &CacheExpiry) -> Option<ResolvedInvocation> {
        if !is_sub_task_id(&expiry.key) {
            debug!("Ignoring expiry for non sub-task key");
            return None;
        }
        let Some(correlation) = self.claim(&expiry.key, Some(&expiry.value)).await else {
            info!("Timeout lost the race; peer response already handled");
            return None;
        };

        warn!(
            peer = %correlation.peer_name,
            timeout_secs = correlation.timeout.as_secs(),
            "Peer did not respond in time"
        );
        let result = PeerResult::timed_out(&correlation);
        self.send_cancel(&correlation).await;

        let ctx = self.registry.get(&correlation.parent_task_id).await?;
        self.record_result(&ctx, &correlation.invocation_id, result).await
    }

    /// Claim every outstanding sub-task of `ctx` and ask its peer to cancel.
    pub async fn cancel_outstanding(&self, ctx: &TaskExecutionContext) -> usize {
        let mut cancelled = 0;
        for correlation in ctx.outstanding_sub_tasks().await {
            if let Some(claimed) = self
                .claim(&correlation.sub_task_id, Some(ctx.task_id()))
                .await
            {
                self.send_cancel(&claimed).await;
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Correlation and status update for an intermediate peer status message.
    pub async fn peer_status(
        &self,
        sub_task_id: &str,
        payload: &Value,
    ) -> Option<(SubTaskCorrelation, StatusUpdate)> {
        let correlation = self.peek(sub_task_id).await?;
        let envelope: JsonRpcResponse<StatusUpdate> = match serde_json::from_value(payload.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Peer status payload is not a status update");
                return None;
            }
        };
        envelope.result.map(|update| (correlation, update))
    }

    async fn send_cancel(&self, correlation: &SubTaskCorrelation) {
        let topic = agent_request_topic(self.publisher.namespace(), &correlation.peer_name);
        let request = JsonRpcRequest::new(
            correlation.sub_task_id.clone(),
            METHOD_CANCEL_TASK,
            CancelRequest {
                id: correlation.sub_task_id.clone(),
            },
        );
        if let Err(e) = self
            .publisher
            .publish_request(&topic, &request, MessageProperties::new())
            .await
        {
            warn!(sub_task_id = %correlation.sub_task_id, error = %e, "Best-effort peer cancellation failed");
        }
    }

    async fn record_result(
        &self,
        ctx: &TaskExecutionContext,
        invocation_id: &str,
        result: PeerResult,
    ) -> Option<ResolvedInvocation> {
        let mut state = ctx.lock().await;
        let Some(group) = state.invocations.get_mut(invocation_id) else {
            warn!(task_id = ctx.task_id(), invocation_id, "No invocation group for result");
            return None;
        };
        group.record(result);
        debug!(
            task_id = ctx.task_id(),
            invocation_id,
            completed = group.completed_count,
            expected = group.expected_count,
            "Invocation progress"
        );
        let results = group.try_resolve()?;
        state.invocations.remove(invocation_id);
        info!(task_id = ctx.task_id(), invocation_id, results = results.len(), "Invocation group resolved");
        Some(ResolvedInvocation {
            task_id: ctx.task_id().to_string(),
            invocation_id: invocation_id.to_string(),
            results,
        })
    }
}

/// Interpret a peer's terminal JSON-RPC reply.
fn peer_result_from_reply(correlation: &SubTaskCorrelation, payload: &Value) -> PeerResult {
    let envelope: JsonRpcResponse<TerminalTask> = match serde_json::from_value(payload.clone()) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(sub_task_id = %correlation.sub_task_id, error = %e, "Unparseable peer response");
            return PeerResult::error(correlation, "Peer returned an unreadable response.");
        }
    };

    if let Some(error) = envelope.error {
        return PeerResult::error(correlation, error.message);
    }
    let Some(task) = envelope.result else {
        return PeerResult::error(correlation, "Peer response carried no result.");
    };

    let (text, data) = task
        .status
        .message
        .as_ref()
        .map(|m| (m.text(), m.data_parts()))
        .unwrap_or_default();
    match task.status.state {
        TaskState::Completed => PeerResult::completed(correlation, text, data),
        state => {
            let message = if text.is_empty() {
                format!("Peer task ended in state {state}.")
            } else {
                text
            };
            PeerResult::error(correlation, message)
        }
    }
}

/// Forwarded status metadata for a peer's intermediate update.
pub fn forwarded_status_metadata(
    delegating_agent: &str,
    correlation: &SubTaskCorrelation,
) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("delegated_by".to_string(), json!(delegating_agent));
    metadata.insert("peer".to_string(), json!(correlation.peer_name));
    metadata.insert("sub_task_id".to_string(), json!(correlation.sub_task_id));
    metadata
}

/// Parts of a forwarded status update.
pub fn forwarded_parts(update: &StatusUpdate) -> Vec<Part> {
    update
        .status
        .message
        .as_ref()
        .map(|m| m.parts.clone())
        .unwrap_or_default()
}
