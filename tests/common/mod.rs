//! Common test utilities for integration tests
//!
//! Provides a scripted agent runtime, a harness wiring an `AgentHost` to the
//! in-memory adapters, and builders for the wire payloads peers send back.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use weft::adapters::memory::{
    InMemoryArtifactStore, InMemorySessionStore, PublishedMessage, RecordingInboundMessage,
    RecordingTransport, TtlCache,
};
use weft::application::{AgentHost, HostPorts, InboundRequest};
use weft::domain::errors::RuntimeError;
use weft::domain::models::a2a::{
    JsonRpcError, JsonRpcResponse, Message, Part, StatusUpdate, TaskStatus, TerminalTask,
};
use weft::domain::models::{
    Config, ContentPart, GenerationEvent, SessionContext, TaskState, ToolResponse,
};
use weft::domain::ports::{AgentRuntime, CacheExpiry, EventStream, RunRequest};
use weft::services::GenerationInterceptor;

pub type Script = Vec<Result<GenerationEvent, RuntimeError>>;

/// A recorded `resume` call.
#[derive(Debug, Clone)]
pub struct ResumeCall {
    pub task_id: String,
    pub session: SessionContext,
    pub responses: Vec<ToolResponse>,
    pub max_llm_calls: u32,
}

/// Runtime that replays queued scripts: one per `run`, one per `resume`.
/// A missing script yields an empty turn.
#[derive(Default)]
pub struct ScriptedRuntime {
    runs: Mutex<VecDeque<Script>>,
    resumes: Mutex<VecDeque<Script>>,
    run_calls: Mutex<Vec<RunRequest>>,
    resume_calls: Mutex<Vec<ResumeCall>>,
}

impl ScriptedRuntime {
    pub fn push_run(&self, script: Script) {
        lock(&self.runs).push_back(script);
    }

    pub fn push_resume(&self, script: Script) {
        lock(&self.resumes).push_back(script);
    }

    pub fn run_calls(&self) -> Vec<RunRequest> {
        lock(&self.run_calls).clone()
    }

    pub fn resume_calls(&self) -> Vec<ResumeCall> {
        lock(&self.resume_calls).clone()
    }

    fn stream(script: Script) -> EventStream {
        let (tx, rx) = mpsc::channel(script.len().max(1));
        for item in script {
            tx.try_send(item).expect("script fits channel");
        }
        rx
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn run(&self, request: RunRequest) -> Result<EventStream, RuntimeError> {
        lock(&self.run_calls).push(request);
        let script = lock(&self.runs).pop_front().unwrap_or_default();
        Ok(Self::stream(script))
    }

    async fn resume(
        &self,
        task_id: &str,
        session: &SessionContext,
        responses: Vec<ToolResponse>,
        max_llm_calls: u32,
    ) -> Result<EventStream, RuntimeError> {
        lock(&self.resume_calls).push(ResumeCall {
            task_id: task_id.to_string(),
            session: session.clone(),
            responses,
            max_llm_calls,
        });
        let script = lock(&self.resumes).pop_front().unwrap_or_default();
        Ok(Self::stream(script))
    }
}

/// An `AgentHost` wired to in-memory adapters.
pub struct Harness {
    pub host: Arc<AgentHost>,
    pub transport: Arc<RecordingTransport>,
    pub runtime: Arc<ScriptedRuntime>,
    pub sessions: Arc<InMemorySessionStore>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub cache: Arc<TtlCache>,
    pub expiries: mpsc::UnboundedReceiver<CacheExpiry>,
}

pub struct HarnessBuilder {
    config: Config,
    interceptors: Vec<Arc<dyn GenerationInterceptor>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.agent_name = "Orchestrator".to_string();
        config.namespace = "test".to_string();
        Self {
            config,
            interceptors: Vec::new(),
        }
    }

    pub fn configure(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn GenerationInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> Harness {
        let transport = Arc::new(RecordingTransport::new());
        let runtime = Arc::new(ScriptedRuntime::default());
        let sessions = Arc::new(InMemorySessionStore::new());
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let (cache, expiries) = TtlCache::new();
        let cache = Arc::new(cache);

        let mut host = AgentHost::new(
            self.config,
            HostPorts {
                transport: transport.clone(),
                cache: cache.clone(),
                runtime: runtime.clone(),
                sessions: sessions.clone(),
                artifacts: Some(artifacts.clone()),
            },
        );
        for interceptor in self.interceptors {
            host = host.with_interceptor(interceptor);
        }

        Harness {
            host: Arc::new(host),
            transport,
            runtime,
            sessions,
            artifacts,
            cache,
            expiries,
        }
    }
}

impl Harness {
    pub fn reply_topic(task_id: &str) -> String {
        format!("test/reply/{task_id}")
    }

    pub fn status_topic(task_id: &str) -> String {
        format!("test/status/{task_id}")
    }

    /// Request with explicit reply and status topics.
    pub fn request(task_id: &str, inbound: Arc<RecordingInboundMessage>) -> InboundRequest {
        InboundRequest::new(task_id, "user-1", "session-1", Message::user_text("go"), inbound)
            .with_client("web")
            .with_jsonrpc_id(json!(format!("rpc-{task_id}")))
            .with_property("replyTo", json!(Self::reply_topic(task_id)))
            .with_property("a2aStatusTopic", json!(Self::status_topic(task_id)))
    }

    pub fn replies(&self, task_id: &str) -> Vec<PublishedMessage> {
        self.transport.published_to(&Self::reply_topic(task_id))
    }

    pub fn statuses(&self, task_id: &str) -> Vec<PublishedMessage> {
        self.transport.published_to(&Self::status_topic(task_id))
    }

    /// Requests published to a peer's request topic.
    pub fn peer_requests(&self, peer: &str) -> Vec<PublishedMessage> {
        self.transport
            .published_to(&format!("test/a2a/v1/agent/request/{peer}"))
    }

    /// Sub-task ids delegated to `peer` via `tasks/send`, in order.
    pub fn delegated_sub_tasks(&self, peer: &str) -> Vec<String> {
        self.peer_requests(peer)
            .into_iter()
            .filter(|m| m.payload["method"] == "tasks/send")
            .filter_map(|m| m.payload["params"]["id"].as_str().map(str::to_string))
            .collect()
    }

    pub fn cancels_sent_to(&self, peer: &str) -> Vec<String> {
        self.peer_requests(peer)
            .into_iter()
            .filter(|m| m.payload["method"] == "tasks/cancel")
            .filter_map(|m| m.payload["params"]["id"].as_str().map(str::to_string))
            .collect()
    }

    /// Concatenated text of every status update published for `task_id`.
    pub fn streamed_text(&self, task_id: &str) -> String {
        self.statuses(task_id)
            .iter()
            .flat_map(|m| {
                m.payload["result"]["status"]["message"]["parts"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
            })
            .filter(|p| p["type"] == "text")
            .filter_map(|p| p["text"].as_str().map(str::to_string))
            .collect()
    }
}

pub fn inbound() -> Arc<RecordingInboundMessage> {
    Arc::new(RecordingInboundMessage::new())
}

/// Final event requesting one peer call per `(function_call_id, peer)`.
pub fn peer_calls(invocation_id: &str, calls: &[(&str, &str)]) -> GenerationEvent {
    let parts = calls
        .iter()
        .map(|(id, peer)| {
            ContentPart::function_call(
                *id,
                format!("peer_{peer}"),
                json!({ "task_description": format!("work for {peer}") }),
            )
        })
        .collect();
    GenerationEvent::new(invocation_id, false, parts)
}

pub fn peer_completed(sub_task_id: &str, text: &str) -> Value {
    let task = TerminalTask {
        id: sub_task_id.to_string(),
        session_id: Some("peer-session".to_string()),
        status: TaskStatus::new(TaskState::Completed, Message::agent(vec![Part::text(text)])),
        artifacts: None,
        metadata: Map::new(),
    };
    serde_json::to_value(JsonRpcResponse::success(Some(json!(sub_task_id)), task))
        .expect("serializable reply")
}

pub fn peer_failed(sub_task_id: &str, message: &str) -> Value {
    let response: JsonRpcResponse<TerminalTask> = JsonRpcResponse::failure(
        Some(json!(sub_task_id)),
        JsonRpcError::internal(message, json!({})),
    );
    serde_json::to_value(response).expect("serializable reply")
}

pub fn peer_working(sub_task_id: &str, text: &str) -> Value {
    let update = StatusUpdate {
        id: sub_task_id.to_string(),
        status: TaskStatus {
            state: TaskState::Working,
            message: Some(Message::agent(vec![Part::text(text)])),
            timestamp: Utc::now(),
        },
        is_final: false,
        metadata: Map::new(),
    };
    serde_json::to_value(JsonRpcResponse::success(Some(json!(sub_task_id)), update))
        .expect("serializable status")
}

pub fn response_topic(sub_task_id: &str) -> String {
    format!("test/a2a/v1/agent/response/Orchestrator/{sub_task_id}")
}

pub fn peer_status_topic(sub_task_id: &str) -> String {
    format!("test/a2a/v1/agent/status/Orchestrator/{sub_task_id}")
}
