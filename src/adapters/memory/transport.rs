//! Transport that records every publish, with failure injection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::TransportError;
use crate::domain::ports::{MessageProperties, Transport};

/// A message captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Destination topic.
    pub topic: String,
    /// JSON payload.
    pub payload: Value,
    /// User properties.
    pub properties: MessageProperties,
}

/// Transport that records publishes and can be told to fail them.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    messages: Mutex<Vec<PublishedMessage>>,
    fail_next: AtomicUsize,
    failing_topics: Mutex<Vec<String>>,
}

impl RecordingTransport {
    /// Recorder with no failures armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` publishes.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every publish whose topic contains `fragment`.
    pub fn fail_topics_containing(&self, fragment: impl Into<String>) {
        self.failing_topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fragment.into());
    }

    /// Disarm every configured failure.
    pub fn clear_failures(&self) {
        self.fail_next.store(0, Ordering::SeqCst);
        self.failing_topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Successfully published messages, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Payloads of every published message.
    pub fn published_payloads(&self) -> Vec<Value> {
        self.published().into_iter().map(|m| m.payload).collect()
    }

    /// Messages published to exactly `topic`.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    fn should_fail(&self, topic: &str) -> bool {
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        consumed
            || self
                .failing_topics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .any(|fragment| topic.contains(fragment.as_str()))
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Value,
        properties: MessageProperties,
    ) -> Result<(), TransportError> {
        if self.should_fail(topic) {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PublishedMessage {
                topic: topic.to_string(),
                payload,
                properties,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let transport = RecordingTransport::new();
        transport.fail_next(1);
        assert!(transport.publish("a", json!(1), MessageProperties::new()).await.is_err());
        assert!(transport.publish("a", json!(2), MessageProperties::new()).await.is_ok());
        assert_eq!(transport.published_payloads(), vec![json!(2)]);
    }

    #[tokio::test]
    async fn test_topic_failures() {
        let transport = RecordingTransport::new();
        transport.fail_topics_containing("/request/");
        assert!(transport
            .publish("ns/a2a/v1/agent/request/P", json!({}), MessageProperties::new())
            .await
            .is_err());
        assert!(transport
            .publish("ns/a2a/v1/client/response/c", json!({}), MessageProperties::new())
            .await
            .is_ok());
        transport.clear_failures();
        assert!(transport
            .publish("ns/a2a/v1/agent/request/P", json!({}), MessageProperties::new())
            .await
            .is_ok());
        assert_eq!(transport.published_to("ns/a2a/v1/agent/request/P").len(), 1);
    }
}
