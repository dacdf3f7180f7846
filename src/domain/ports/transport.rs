//! Pub/sub transport port.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::errors::TransportError;

/// User properties attached to a published message (`replyTo`, `a2aStatusTopic`, ...).
pub type MessageProperties = Map<String, Value>;

/// Outbound side of the message broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a JSON payload to `topic`.
    ///
    /// # Errors
    /// Returns `TransportError::PublishFailed` if the broker rejects the message.
    async fn publish(
        &self,
        topic: &str,
        payload: Value,
        properties: MessageProperties,
    ) -> Result<(), TransportError>;
}

/// Handle to the inbound message that started a logical task.
///
/// Exactly one of `ack`/`nack` is called, exactly once, per task.
pub trait InboundMessage: Send + Sync {
    /// Acknowledge; the broker drops the message.
    fn ack(&self) -> Result<(), TransportError>;

    /// Reject for redelivery.
    fn nack(&self) -> Result<(), TransportError>;
}
