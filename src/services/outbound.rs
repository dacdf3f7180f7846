//! Outbound publication helpers shared by the services.
//!
//! Knows how to derive a task's reply and status topics and how to wrap
//! status, artifact and terminal payloads in JSON-RPC envelopes.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::domain::errors::TransportError;
use crate::domain::models::a2a::{
    Artifact, ArtifactUpdate, JsonRpcRequest, JsonRpcResponse, Message, Part, StatusUpdate,
    TaskStatus,
};
use crate::domain::models::topics::{client_response_topic, gateway_status_topic};
use crate::domain::models::{Config, LogicalTask, TaskState};
use crate::domain::ports::{MessageProperties, Transport};

/// Data-part key identifying a side-channel signal.
pub const SIGNAL_TYPE_KEY: &str = "a2a_signal_type";

/// Signal type of an inline status message.
pub const STATUS_SIGNAL: &str = "agent_status_message";

/// Signal type published when a tool failure ends a task.
pub const TOOL_FAILURE_SIGNAL: &str = "tool_failure";

/// Builds topics and publishes every outbound envelope for one agent.
pub struct OutboundPublisher {
    transport: Arc<dyn Transport>,
    namespace: String,
    agent_name: String,
    gateway_id: String,
}

impl OutboundPublisher {
    /// Publisher for the agent described by `config`.
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self {
            transport,
            namespace: config.namespace.clone(),
            agent_name: config.agent_name.clone(),
            gateway_id: config.effective_gateway_id().to_string(),
        }
    }

    /// Topic namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Publishing agent.
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Status topic from the inbound properties, or the gateway fallback.
    pub fn status_topic(&self, task: &LogicalTask) -> String {
        task.origin
            .status_topic
            .clone()
            .unwrap_or_else(|| gateway_status_topic(&self.namespace, &self.gateway_id, &task.id))
    }

    /// Reply topic from the inbound properties, or the client response topic.
    pub fn reply_topic(&self, task: &LogicalTask) -> String {
        task.origin
            .reply_to_topic
            .clone()
            .unwrap_or_else(|| client_response_topic(&self.namespace, &task.origin.client_id))
    }

    /// Publish a non-final `working` status update carrying `parts`.
    pub async fn publish_status(
        &self,
        task: &LogicalTask,
        parts: Vec<Part>,
        mut metadata: Map<String, Value>,
    ) -> Result<(), TransportError> {
        metadata
            .entry("agent_name")
            .or_insert_with(|| Value::String(self.agent_name.clone()));
        let update = StatusUpdate {
            id: task.id.clone(),
            status: TaskStatus::new(TaskState::Working, Message::agent(parts)),
            is_final: false,
            metadata,
        };
        let envelope = JsonRpcResponse::success(task.origin.jsonrpc_request_id.clone(), update);
        let topic = self.status_topic(task);
        self.publish_json(&topic, &envelope, MessageProperties::new()).await
    }

    /// Publish a side-channel signal as a data part.
    pub async fn publish_signal(
        &self,
        task: &LogicalTask,
        signal_type: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        let part = Part::data(json!({ SIGNAL_TYPE_KEY: signal_type, "text": text }));
        self.publish_status(task, vec![part], Map::new()).await
    }

    /// Publish an artifact update to the task's status topic.
    pub async fn publish_artifact(
        &self,
        task: &LogicalTask,
        artifact: Artifact,
    ) -> Result<(), TransportError> {
        let update = ArtifactUpdate {
            id: task.id.clone(),
            artifact,
        };
        let envelope = JsonRpcResponse::success(task.origin.jsonrpc_request_id.clone(), update);
        let topic = self.status_topic(task);
        self.publish_json(&topic, &envelope, MessageProperties::new()).await
    }

    /// Publish a terminal response envelope to the task's reply topic.
    pub async fn publish_reply<R: Serialize + Sync>(
        &self,
        task: &LogicalTask,
        response: &JsonRpcResponse<R>,
    ) -> Result<(), TransportError> {
        let topic = self.reply_topic(task);
        self.publish_json(&topic, response, MessageProperties::new()).await
    }

    /// Publish a request envelope to a peer topic.
    pub async fn publish_request<P: Serialize + Sync>(
        &self,
        topic: &str,
        request: &JsonRpcRequest<P>,
        properties: MessageProperties,
    ) -> Result<(), TransportError> {
        self.publish_json(topic, request, properties).await
    }

    async fn publish_json<T: Serialize + ?Sized + Sync>(
        &self,
        topic: &str,
        payload: &T,
        properties: MessageProperties,
    ) -> Result<(), TransportError> {
        let value = serde_json::to_value(payload).map_err(|e| TransportError::PublishFailed {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        debug!(topic, "Publishing");
        self.transport.publish(topic, value, properties).await
    }
}
