//! Session store port.
//!
//! Holds the runtime's conversation history. Finalization reads the last
//! event, repairs dangling tool calls and deletes run-based sessions.

use async_trait::async_trait;

use crate::domain::errors::OrchestrationResult;
use crate::domain::models::GenerationEvent;

/// Conversation history keyed by user and session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create the session if it does not exist yet.
    async fn ensure_session(&self, user_id: &str, session_id: &str) -> OrchestrationResult<()>;

    /// Events of a session in append order.
    ///
    /// # Errors
    /// Returns `OrchestrationError::Session` if the session does not exist.
    async fn events(&self, user_id: &str, session_id: &str)
        -> OrchestrationResult<Vec<GenerationEvent>>;

    /// Most recent event, if any.
    async fn last_event(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> OrchestrationResult<Option<GenerationEvent>>;

    /// Append an event to the session.
    async fn append_event(
        &self,
        user_id: &str,
        session_id: &str,
        event: GenerationEvent,
    ) -> OrchestrationResult<()>;

    /// Delete a session. Deleting a missing session is not an error.
    async fn delete_session(&self, user_id: &str, session_id: &str) -> OrchestrationResult<()>;
}
