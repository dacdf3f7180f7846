//! Agent host: the per-agent orchestration loop.
//!
//! [`AgentHost`] accepts task requests, drives runtime turns through the
//! stream processor, fans `peer_*` calls out to other agents and resumes the
//! runtime once every peer of an invocation has answered or timed out.
//! Every task ends in exactly one terminal response.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::{OrchestrationResult, RuntimeError};
use crate::domain::models::a2a::Message;
use crate::domain::models::topics::sub_task_id_from_topic;
use crate::domain::models::{
    Config, GenerationEvent, LogicalTask, ResolvedInvocation, SessionBehavior, SessionContext,
    TaskOrigin,
};
use crate::domain::ports::{
    AgentRuntime, ArtifactStore, CacheExpiry, EventStream, ExpiringCache, InboundMessage,
    MessageProperties, RunRequest, SessionStore, Transport,
};
use crate::services::delegation_coordinator::{forwarded_parts, forwarded_status_metadata};
use crate::services::{
    DelegationCoordinator, FinalizationManager, FinalizeReport, GenerationInterceptor,
    InterceptorChain, OutboundPublisher, PeerCall, StreamProcessor, TaskExecutionContext,
    TaskOutcome, TaskRegistry,
};

/// Error text returned to the model for a peer call that could not be sent.
const DELEGATION_FAILED_MESSAGE: &str = "Failed to delegate the request to the peer agent.";

/// External collaborators of an [`AgentHost`].
pub struct HostPorts {
    /// Outbound pub/sub publishing.
    pub transport: Arc<dyn Transport>,
    /// Sub-task correlation entries with per-entry expiry.
    pub cache: Arc<dyn ExpiringCache>,
    /// The agent runtime producing generation events.
    pub runtime: Arc<dyn AgentRuntime>,
    /// Conversation history.
    pub sessions: Arc<dyn SessionStore>,
    /// Enables artifact return by reference or by value when present.
    pub artifacts: Option<Arc<dyn ArtifactStore>>,
}

/// An accepted inbound task request, already decoded by the transport layer.
pub struct InboundRequest {
    /// Logical task id chosen by the requester.
    pub task_id: String,
    /// Owner of the session.
    pub user_id: String,
    /// Client-facing session id.
    pub session_id: String,
    /// Requesting client, used for the fallback reply topic.
    pub client_id: String,
    /// JSON-RPC id echoed on every response for this task.
    pub jsonrpc_request_id: Option<Value>,
    /// The user message that starts the first turn.
    pub message: Message,
    /// Transport properties (`replyTo`, `a2aStatusTopic`, `a2aUserConfig`)
    pub properties: MessageProperties,
    /// `None` uses the configured default
    pub session_behavior: Option<SessionBehavior>,
    /// Whether the requester asked for streamed status updates.
    pub streaming: bool,
    /// Settled exactly once when the task finalizes.
    pub inbound: Arc<dyn InboundMessage>,
}

impl InboundRequest {
    /// A streaming request with no reply properties set.
    pub fn new(
        task_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        message: Message,
        inbound: Arc<dyn InboundMessage>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            client_id: String::new(),
            jsonrpc_request_id: None,
            message,
            properties: MessageProperties::new(),
            session_behavior: None,
            streaming: true,
            inbound,
        }
    }

    /// Set the requesting client id.
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set the JSON-RPC request id.
    pub fn with_jsonrpc_id(mut self, id: Value) -> Self {
        self.jsonrpc_request_id = Some(id);
        self
    }

    /// Add a transport property such as `replyTo`.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Override the configured session behavior.
    pub fn with_session_behavior(mut self, behavior: SessionBehavior) -> Self {
        self.session_behavior = Some(behavior);
        self
    }

    /// Request or decline streamed status updates.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    fn origin(&self) -> TaskOrigin {
        let property = |key: &str| {
            self.properties
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        TaskOrigin {
            jsonrpc_request_id: self.jsonrpc_request_id.clone(),
            client_id: self.client_id.clone(),
            reply_to_topic: property("replyTo"),
            status_topic: property("a2aStatusTopic"),
            user_config: self.properties.get("a2aUserConfig").cloned(),
        }
    }
}

/// What to do once a runtime turn has drained.
enum TurnEnd {
    Resume(ResolvedInvocation),
    Paused,
    Complete,
    Cancel,
}

/// Hosts one agent: accepts tasks, drives runtime turns, delegates peer
/// calls and finalizes every task exactly once.
///
/// # Turn discipline
///
/// At most one runtime turn is active per task. A peer resolution that lands
/// while a turn is still streaming is parked on the context and picked up
/// when that turn drains, so the runtime is never resumed concurrently with
/// itself and a paused task is never completed under a pending resume.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use weft::application::{AgentHost, HostPorts, InboundRequest};
/// use weft::domain::models::a2a::Message;
/// use weft::domain::models::Config;
///
/// async fn example(ports: HostPorts, inbound: Arc<dyn weft::domain::ports::InboundMessage>) {
///     let host = Arc::new(AgentHost::new(Config::default(), ports));
///     let request = InboundRequest::new("task-1", "user", "session", Message::user_text("hi"), inbound);
///     let _ = host.handle_request(request).await;
/// }
/// ```
pub struct AgentHost {
    config: Config,
    registry: Arc<TaskRegistry>,
    publisher: Arc<OutboundPublisher>,
    coordinator: DelegationCoordinator,
    streams: StreamProcessor,
    finalizer: FinalizationManager,
    interceptors: InterceptorChain,
    runtime: Arc<dyn AgentRuntime>,
    sessions: Arc<dyn SessionStore>,
}

impl AgentHost {
    /// Wire the host's services over `ports`.
    pub fn new(config: Config, ports: HostPorts) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let publisher = Arc::new(OutboundPublisher::new(ports.transport, &config));
        let coordinator = DelegationCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&publisher),
            ports.cache,
            Duration::from_secs(config.inter_agent.request_timeout_seconds),
        );
        let mut streams =
            StreamProcessor::new(Arc::clone(&publisher), config.stream_batching_threshold_bytes);
        if let Some(store) = ports.artifacts {
            streams = streams.with_artifact_store(store, config.artifact_handling_mode);
        }
        let finalizer = FinalizationManager::new(
            Arc::clone(&registry),
            Arc::clone(&publisher),
            Arc::clone(&ports.sessions),
        );

        Self {
            config,
            registry,
            publisher,
            coordinator,
            streams,
            finalizer,
            interceptors: InterceptorChain::with_defaults(),
            runtime: ports.runtime,
            sessions: ports.sessions,
        }
    }

    /// Append an interceptor after the built-in filters.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn GenerationInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Tasks currently in flight.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Peer delegation state.
    pub fn coordinator(&self) -> &DelegationCoordinator {
        &self.coordinator
    }

    /// Accept a task request and drive it until it finalizes or pauses.
    ///
    /// # Errors
    /// Returns `TaskAlreadyExists` for a duplicate task id; the inbound
    /// message has been nacked in that case. Every other failure is reported
    /// through the task's terminal response.
    #[instrument(skip(self, request), fields(task_id = %request.task_id))]
    pub async fn handle_request(&self, request: InboundRequest) -> OrchestrationResult<()> {
        let behavior = request
            .session_behavior
            .unwrap_or(self.config.default_session_behavior);
        let streaming = request.streaming && self.config.supports_streaming;
        let mut session = SessionContext::new(&request.user_id, &request.session_id);
        if behavior == SessionBehavior::RunBased {
            session = session.with_effective_session(format!(
                "{}:{}:run",
                request.session_id, request.task_id
            ));
        }

        let task = LogicalTask::new(&request.task_id, &self.config.agent_name, session.clone())
            .with_origin(request.origin())
            .with_session_behavior(behavior)
            .with_streaming(streaming)
            .with_inbound(Arc::clone(&request.inbound));

        let ctx = match self.registry.create(task).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "Rejecting request");
                if let Err(nack_err) = request.inbound.nack() {
                    error!(error = %nack_err, "Failed to nack rejected request");
                }
                return Err(e);
            }
        };
        info!(
            session_behavior = behavior.as_str(),
            streaming,
            effective_session_id = %session.effective_session_id,
            "Task accepted"
        );

        if let Err(e) = self
            .sessions
            .ensure_session(&session.user_id, &session.effective_session_id)
            .await
        {
            self.finish(
                &ctx,
                TaskOutcome::Failed {
                    reason: e.to_string(),
                },
            )
            .await;
            return Ok(());
        }

        ctx.lock().await.turn_active = true;
        let run = RunRequest {
            task_id: request.task_id.clone(),
            session,
            message: request.message,
            max_llm_calls: self.config.max_llm_calls_per_task,
        };
        match self.runtime.run(run).await {
            Ok(stream) => self.drive(&ctx, stream).await,
            Err(e) => {
                self.finish(&ctx, outcome_for_runtime_error(e)).await;
            }
        }
        Ok(())
    }

    /// Route a message that arrived on one of this agent's peer topics.
    pub async fn handle_peer_message(&self, topic: &str, payload: &Value) {
        let Some(sub_task_id) = sub_task_id_from_topic(topic) else {
            debug!(topic, "Ignoring message on non sub-task topic");
            return;
        };
        if topic.contains("/agent/status/") {
            self.handle_peer_status(sub_task_id, payload).await;
        } else {
            self.handle_peer_response(sub_task_id, payload).await;
        }
    }

    /// A peer's terminal reply for `sub_task_id`.
    #[instrument(skip(self, payload))]
    pub async fn handle_peer_response(&self, sub_task_id: &str, payload: &Value) {
        if let Some(resolved) = self.coordinator.handle_peer_response(sub_task_id, payload).await {
            self.on_resolved(resolved).await;
        }
    }

    /// Forward a peer's intermediate status to the parent task's status topic.
    #[instrument(skip(self, payload))]
    pub async fn handle_peer_status(&self, sub_task_id: &str, payload: &Value) {
        let Some((correlation, update)) = self.coordinator.peer_status(sub_task_id, payload).await
        else {
            return;
        };
        if update.is_final {
            debug!("Final status arrives on the response topic; not forwarding");
            return;
        }
        let parts = forwarded_parts(&update);
        if parts.is_empty() {
            return;
        }
        let Some(ctx) = self.registry.get(&correlation.parent_task_id).await else {
            return;
        };
        let metadata = forwarded_status_metadata(self.publisher.agent_name(), &correlation);
        if let Err(e) = self.publisher.publish_status(ctx.task(), parts, metadata).await {
            warn!(error = %e, "Failed to forward peer status");
        }
    }

    /// A correlation entry expired: the peer timed out unless its reply won the claim.
    pub async fn handle_cache_expiry(&self, expiry: CacheExpiry) {
        if let Some(resolved) = self.coordinator.handle_expiry(&expiry).await {
            self.on_resolved(resolved).await;
        }
    }

    /// Consume cache expiries on the current runtime until the channel closes.
    pub fn spawn_expiry_listener(
        self: &Arc<Self>,
        mut expiries: mpsc::UnboundedReceiver<CacheExpiry>,
    ) -> JoinHandle<()> {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(expiry) = expiries.recv().await {
                host.handle_cache_expiry(expiry).await;
            }
            debug!("Expiry channel closed");
        })
    }

    /// Cancel a task and its outstanding peer sub-tasks.
    ///
    /// Returns `false` if the task is not in flight.
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let Some(ctx) = self.registry.get(task_id).await else {
            info!("Cancel for unknown or finished task");
            return false;
        };
        ctx.cancel();
        let cancelled_peers = self.coordinator.cancel_outstanding(&ctx).await;
        info!(cancelled_peers, "Task cancellation requested");

        // An active turn observes the token and finalizes itself.
        let idle = !ctx.lock().await.turn_active;
        if idle {
            self.finalizer.finalize(task_id, TaskOutcome::Canceled).await;
        }
        true
    }

    async fn on_resolved(&self, resolved: ResolvedInvocation) {
        let Some(ctx) = self.registry.get(&resolved.task_id).await else {
            warn!(task_id = %resolved.task_id, "Resolved invocation for finished task");
            return;
        };
        let start = {
            let mut state = ctx.lock().await;
            if state.turn_active {
                debug!(task_id = %resolved.task_id, "Turn still active; parking resume");
                state.pending_resume = Some(resolved);
                None
            } else {
                state.turn_active = true;
                state.paused = false;
                Some(resolved)
            }
        };
        let Some(resolved) = start else {
            return;
        };
        match self.start_resume(&ctx, &resolved).await {
            Ok(stream) => self.drive(&ctx, stream).await,
            Err(outcome) => {
                self.finish(&ctx, outcome).await;
            }
        }
    }

    async fn start_resume(
        &self,
        ctx: &TaskExecutionContext,
        resolved: &ResolvedInvocation,
    ) -> Result<EventStream, TaskOutcome> {
        if ctx.is_cancelled() {
            return Err(TaskOutcome::Canceled);
        }
        info!(
            task_id = ctx.task_id(),
            invocation_id = %resolved.invocation_id,
            results = resolved.results.len(),
            "Resuming runtime with peer results"
        );
        self.runtime
            .resume(
                ctx.task_id(),
                &ctx.task().session,
                resolved.tool_responses(),
                self.config.max_llm_calls_per_task,
            )
            .await
            .map_err(outcome_for_runtime_error)
    }

    /// Drive turns until the task finalizes or parks waiting on peers.
    async fn drive(&self, ctx: &Arc<TaskExecutionContext>, mut stream: EventStream) {
        loop {
            if let Some(outcome) = self.consume_turn(ctx, &mut stream).await {
                ctx.lock().await.turn_active = false;
                self.finish(ctx, outcome).await;
                return;
            }

            let next = {
                let mut state = ctx.lock().await;
                if ctx.is_cancelled() {
                    state.turn_active = false;
                    TurnEnd::Cancel
                } else if let Some(resolved) = state.pending_resume.take() {
                    state.paused = false;
                    TurnEnd::Resume(resolved)
                } else if state.paused {
                    state.turn_active = false;
                    TurnEnd::Paused
                } else {
                    state.turn_active = false;
                    TurnEnd::Complete
                }
            };

            match next {
                TurnEnd::Resume(resolved) => match self.start_resume(ctx, &resolved).await {
                    Ok(next_stream) => stream = next_stream,
                    Err(outcome) => {
                        ctx.lock().await.turn_active = false;
                        self.finish(ctx, outcome).await;
                        return;
                    }
                },
                TurnEnd::Paused => {
                    info!(task_id = ctx.task_id(), "Turn ended; waiting on peer agents");
                    return;
                }
                TurnEnd::Complete => {
                    let report = self
                        .finalizer
                        .finalize(ctx.task_id(), TaskOutcome::Completed)
                        .await;
                    if report == FinalizeReport::Paused {
                        debug!(task_id = ctx.task_id(), "Task paused during completion");
                    }
                    return;
                }
                TurnEnd::Cancel => {
                    self.finish(ctx, TaskOutcome::Canceled).await;
                    return;
                }
            }
        }
    }

    /// Finalize a task, first cancelling any peer sub-tasks it still waits on
    /// unless the outcome is a normal completion.
    async fn finish(&self, ctx: &TaskExecutionContext, outcome: TaskOutcome) -> FinalizeReport {
        if outcome != TaskOutcome::Completed {
            let cancelled_peers = self.coordinator.cancel_outstanding(ctx).await;
            if cancelled_peers > 0 {
                info!(task_id = ctx.task_id(), cancelled_peers, "Cancelled peers of ended task");
            }
        }
        self.finalizer.finalize(ctx.task_id(), outcome).await
    }

    /// Process one turn's events. Returns an outcome if the turn ended abnormally.
    async fn consume_turn(
        &self,
        ctx: &TaskExecutionContext,
        stream: &mut EventStream,
    ) -> Option<TaskOutcome> {
        let cancellation = ctx.cancellation_token();
        loop {
            let item = tokio::select! {
                biased;
                () = cancellation.cancelled() => return Some(TaskOutcome::Canceled),
                item = stream.recv() => item,
            };
            match item? {
                Ok(event) => self.handle_event(ctx, event).await,
                Err(e) => return Some(outcome_for_runtime_error(e)),
            }
        }
    }

    async fn handle_event(&self, ctx: &TaskExecutionContext, event: GenerationEvent) {
        let task = ctx.task();
        let Some(event) = self.interceptors.run_before(task, event) else {
            return;
        };

        if let Err(e) = self.streams.process_event(ctx, &event).await {
            warn!(task_id = ctx.task_id(), error = %e, "Failed to publish stream output");
        }

        if event.is_final() {
            let calls: Vec<PeerCall> = event
                .function_calls()
                .iter()
                .filter_map(PeerCall::from_function_call)
                .collect();
            if !calls.is_empty() {
                self.delegate(ctx, &event.invocation_id, calls).await;
            }
        }

        self.interceptors.run_after(task, &event);
    }

    /// Fan peer calls out and park the task until every one completes.
    async fn delegate(&self, ctx: &TaskExecutionContext, invocation_id: &str, calls: Vec<PeerCall>) {
        if ctx.is_cancelled() {
            return;
        }
        let task_id = ctx.task_id();
        ctx.set_paused(true).await;
        info!(task_id, invocation_id, calls = calls.len(), "Delegating to peer agents");

        for call in calls {
            if let Err(e) = self
                .coordinator
                .submit(call.clone(), task_id, invocation_id, None)
                .await
            {
                warn!(task_id, peer = %call.peer_name, error = %e, "Delegation failed");
                self.coordinator
                    .record_local_failure(task_id, invocation_id, &call, DELEGATION_FAILED_MESSAGE)
                    .await;
            }
        }

        // Still inside the turn: the resolution is picked up when it drains.
        if let Some(resolved) = self.coordinator.seal(task_id, invocation_id).await {
            ctx.lock().await.pending_resume = Some(resolved);
        }
    }
}

fn outcome_for_runtime_error(error: RuntimeError) -> TaskOutcome {
    match error {
        RuntimeError::LimitExceeded { .. } => TaskOutcome::LimitReached,
        RuntimeError::Cancelled => TaskOutcome::Canceled,
        other => TaskOutcome::Failed {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemorySessionStore, RecordingInboundMessage, RecordingTransport, TtlCache,
    };
    use crate::domain::errors::OrchestrationError;
    use crate::domain::models::ToolResponse;
    use async_trait::async_trait;
    use serde_json::json;

    /// Runtime that replays one fixed event list per call.
    struct FixedRuntime {
        events: Vec<Result<GenerationEvent, RuntimeError>>,
    }

    impl FixedRuntime {
        fn stream(&self) -> EventStream {
            let (tx, rx) = mpsc::channel(self.events.len().max(1));
            for event in &self.events {
                let _ = tx.try_send(event.clone());
            }
            rx
        }
    }

    #[async_trait]
    impl AgentRuntime for FixedRuntime {
        async fn run(&self, _request: RunRequest) -> Result<EventStream, RuntimeError> {
            Ok(self.stream())
        }

        async fn resume(
            &self,
            _task_id: &str,
            _session: &SessionContext,
            _responses: Vec<ToolResponse>,
            _max_llm_calls: u32,
        ) -> Result<EventStream, RuntimeError> {
            Ok(self.stream())
        }
    }

    fn host(
        events: Vec<Result<GenerationEvent, RuntimeError>>,
    ) -> (AgentHost, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let (cache, _expiries) = TtlCache::new();
        let ports = HostPorts {
            transport: transport.clone(),
            cache: Arc::new(cache),
            runtime: Arc::new(FixedRuntime { events }),
            sessions: Arc::new(InMemorySessionStore::new()),
            artifacts: None,
        };
        (AgentHost::new(Config::default(), ports), transport)
    }

    #[tokio::test]
    async fn test_simple_turn_completes_and_acks() {
        let (host, transport) = host(vec![
            Ok(GenerationEvent::partial_text("inv", "Hello")),
            Ok(GenerationEvent::final_text("inv", "Hello")),
        ]);
        let inbound = Arc::new(RecordingInboundMessage::new());
        let request = InboundRequest::new("t1", "u", "s", Message::user_text("hi"), inbound.clone())
            .with_property("replyTo", json!("reply/t1"));

        host.handle_request(request).await.unwrap();

        assert_eq!(inbound.acks(), 1);
        assert!(host.registry().is_empty().await);
        let replies = transport.published_to("reply/t1");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].payload["result"]["status"]["state"], "completed");
    }

    #[tokio::test]
    async fn test_duplicate_task_is_nacked() {
        let (host, _transport) = host(vec![]);
        let first = Arc::new(RecordingInboundMessage::new());
        host.registry()
            .create(LogicalTask::new("t1", "weft-agent", SessionContext::new("u", "s")))
            .await
            .unwrap();

        let request = InboundRequest::new("t1", "u", "s", Message::user_text("hi"), first.clone());
        let err = host.handle_request(request).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::TaskAlreadyExists(_)));
        assert_eq!(first.nacks(), 1);
    }

    #[tokio::test]
    async fn test_limit_exceeded_maps_to_limit_reached() {
        let (host, transport) = host(vec![
            Ok(GenerationEvent::partial_text("inv", "thinking")),
            Err(RuntimeError::LimitExceeded { max_calls: 20 }),
        ]);
        let inbound = Arc::new(RecordingInboundMessage::new());
        let request = InboundRequest::new("t1", "u", "s", Message::user_text("hi"), inbound.clone())
            .with_property("replyTo", json!("reply/t1"));

        host.handle_request(request).await.unwrap();

        assert_eq!(inbound.settlements(), 1);
        let replies = transport.published_to("reply/t1");
        assert_eq!(replies[0].payload["error"]["data"]["reason"], "llm_call_limit_reached");
    }

    #[test]
    fn test_runtime_error_mapping() {
        assert_eq!(
            outcome_for_runtime_error(RuntimeError::Cancelled),
            TaskOutcome::Canceled
        );
        assert!(matches!(
            outcome_for_runtime_error(RuntimeError::ToolFailure("x".into())),
            TaskOutcome::Failed { .. }
        ));
        assert_eq!(
            outcome_for_runtime_error(RuntimeError::LimitExceeded { max_calls: 1 }),
            TaskOutcome::LimitReached
        );
    }
}
