//! Bridges transport callbacks into the scheduler domain.
//!
//! Every callback is turned into a job on the [`Dispatcher`]. If the handoff
//! fails the originating message is nacked so the broker can redeliver it.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use crate::application::agent_host::{AgentHost, InboundRequest};
use crate::application::scheduler::{DispatchTicket, Dispatcher};
use crate::domain::ports::{CacheExpiry, InboundMessage};

/// Entry point for transport callbacks.
pub struct InboundRouter {
    host: Arc<AgentHost>,
    dispatcher: Dispatcher,
}

impl InboundRouter {
    /// Route work for `host` through `dispatcher`.
    pub fn new(host: Arc<AgentHost>, dispatcher: Dispatcher) -> Self {
        Self { host, dispatcher }
    }

    /// A new task request.
    pub fn on_request(&self, request: InboundRequest) -> Option<DispatchTicket> {
        let host = Arc::clone(&self.host);
        let inbound = Arc::clone(&request.inbound);
        self.dispatcher
            .dispatch(
                "task_request",
                async move { host.handle_request(request).await },
                move || nack(inbound.as_ref()),
            )
            .ok()
    }

    /// A message on one of this agent's peer response or status topics.
    pub fn on_peer_message(
        &self,
        topic: &str,
        payload: Value,
        inbound: Arc<dyn InboundMessage>,
    ) -> Option<DispatchTicket> {
        let host = Arc::clone(&self.host);
        let topic = topic.to_string();
        let settle = Arc::clone(&inbound);
        self.dispatcher
            .dispatch(
                "peer_message",
                async move {
                    host.handle_peer_message(&topic, &payload).await;
                    if let Err(e) = settle.ack() {
                        warn!(error = %e, "Failed to ack peer message");
                    }
                    Ok(())
                },
                move || nack(inbound.as_ref()),
            )
            .ok()
    }

    /// A correlation cache expiry.
    pub fn on_cache_expiry(&self, expiry: CacheExpiry) -> Option<DispatchTicket> {
        let host = Arc::clone(&self.host);
        let key = expiry.key.clone();
        self.dispatcher
            .dispatch(
                "cache_expiry",
                async move {
                    host.handle_cache_expiry(expiry).await;
                    Ok(())
                },
                move || error!(key = %key, "Dropped cache expiry; scheduler unavailable"),
            )
            .ok()
    }

    /// A cancel request for `task_id`.
    pub fn on_cancel(&self, task_id: &str, inbound: Arc<dyn InboundMessage>) -> Option<DispatchTicket> {
        let host = Arc::clone(&self.host);
        let task_id = task_id.to_string();
        let settle = Arc::clone(&inbound);
        self.dispatcher
            .dispatch(
                "cancel_task",
                async move {
                    host.cancel_task(&task_id).await;
                    if let Err(e) = settle.ack() {
                        warn!(error = %e, "Failed to ack cancel request");
                    }
                    Ok(())
                },
                move || nack(inbound.as_ref()),
            )
            .ok()
    }
}

fn nack(inbound: &dyn InboundMessage) {
    if let Err(e) = inbound.nack() {
        error!(error = %e, "Failed to nack rejected message");
    }
}
