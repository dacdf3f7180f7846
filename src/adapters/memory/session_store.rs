//! In-memory session history.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::GenerationEvent;
use crate::domain::ports::SessionStore;

type SessionKey = (String, String);

/// Session history kept in memory, keyed by `(user_id, session_id)`.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, Vec<GenerationEvent>>>,
}

impl InMemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of existing sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn key(user_id: &str, session_id: &str) -> SessionKey {
    (user_id.to_string(), session_id.to_string())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn ensure_session(&self, user_id: &str, session_id: &str) -> OrchestrationResult<()> {
        self.sessions
            .write()
            .await
            .entry(key(user_id, session_id))
            .or_default();
        Ok(())
    }

    async fn events(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> OrchestrationResult<Vec<GenerationEvent>> {
        self.sessions
            .read()
            .await
            .get(&key(user_id, session_id))
            .cloned()
            .ok_or_else(|| OrchestrationError::Session(format!("session {session_id} not found")))
    }

    async fn last_event(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> OrchestrationResult<Option<GenerationEvent>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&key(user_id, session_id))
            .and_then(|events| events.last().cloned()))
    }

    async fn append_event(
        &self,
        user_id: &str,
        session_id: &str,
        event: GenerationEvent,
    ) -> OrchestrationResult<()> {
        let mut sessions = self.sessions.write().await;
        let events = sessions
            .get_mut(&key(user_id, session_id))
            .ok_or_else(|| OrchestrationError::Session(format!("session {session_id} not found")))?;
        events.push(event);
        Ok(())
    }

    async fn delete_session(&self, user_id: &str, session_id: &str) -> OrchestrationResult<()> {
        self.sessions.write().await.remove(&key(user_id, session_id));
        Ok(())
    }
}
