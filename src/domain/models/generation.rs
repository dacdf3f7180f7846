//! Generation events emitted by the agent runtime.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// State-delta key prefix the runtime sets when a tool queued an artifact for return.
pub const ARTIFACT_RETURN_STATE_PREFIX: &str = "temp:a2a_return_artifact:";

/// Name of the runtime's internal continuation tool; its responses are never published.
pub const CONTINUE_GENERATION_TOOL: &str = "_continue_generation";

/// Custom-metadata flag marking an event superseded by an interruption.
pub const WAS_INTERRUPTED_KEY: &str = "was_interrupted";

/// One part of a generation event's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Model text.
    Text {
        /// The text.
        text: String,
    },
    /// A tool call requested by the model.
    FunctionCall {
        /// Call id, echoed by the matching response.
        id: String,
        /// Tool name.
        name: String,
        /// JSON arguments.
        #[serde(default)]
        args: Value,
    },
    /// A tool result fed back to the model.
    FunctionResponse {
        /// Id of the call being answered.
        id: String,
        /// Tool name.
        name: String,
        /// Tool output.
        response: Value,
    },
    /// Structured data.
    Data {
        /// The payload.
        data: Value,
    },
}

impl ContentPart {
    /// Text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Function call part.
    pub fn function_call(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self::FunctionCall {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    /// The text if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Whether this is a text part.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }
}

/// A function call awaiting its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// JSON arguments.
    pub args: Value,
}

/// A tool response injected back into a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Id of the call being answered.
    pub function_call_id: String,
    /// Tool name.
    pub name: String,
    /// Tool output.
    pub response: Value,
}

impl From<ToolResponse> for ContentPart {
    fn from(r: ToolResponse) -> Self {
        Self::FunctionResponse {
            id: r.function_call_id,
            name: r.name,
            response: r.response,
        }
    }
}

/// One event in a runtime turn. Partial events carry streamed text deltas;
/// the final event of a turn carries the aggregated content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationEvent {
    /// Unique event id.
    pub id: String,
    /// Runtime invocation that produced the event.
    pub invocation_id: String,
    /// Agent or tool that authored the event.
    pub author: String,
    /// Streamed delta rather than a turn-ending event.
    pub is_partial: bool,
    /// Ordered content.
    #[serde(default)]
    pub content_parts: Vec<ContentPart>,
    /// Session state changes made during the event.
    #[serde(default)]
    pub state_delta: HashMap<String, Value>,
    /// Runtime-specific flags.
    #[serde(default)]
    pub custom_metadata: HashMap<String, Value>,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
}

impl GenerationEvent {
    /// Event with a fresh id, stamped now.
    pub fn new(invocation_id: impl Into<String>, is_partial: bool, parts: Vec<ContentPart>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            author: String::new(),
            is_partial,
            content_parts: parts,
            state_delta: HashMap::new(),
            custom_metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Partial event carrying a single text delta.
    pub fn partial_text(invocation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(invocation_id, true, vec![ContentPart::text(text)])
    }

    /// Final event carrying a single text part.
    pub fn final_text(invocation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(invocation_id, false, vec![ContentPart::text(text)])
    }

    /// Final event that injects tool responses into a session.
    pub fn tool_responses(
        invocation_id: impl Into<String>,
        author: impl Into<String>,
        responses: Vec<ToolResponse>,
    ) -> Self {
        let parts = responses.into_iter().map(ContentPart::from).collect();
        Self::new(invocation_id, false, parts).with_author(author)
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Add a state-delta entry.
    pub fn with_state_delta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state_delta.insert(key.into(), value);
        self
    }

    /// Add a custom metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom_metadata.insert(key.into(), value);
        self
    }

    /// Whether the event ends a turn.
    pub fn is_final(&self) -> bool {
        !self.is_partial
    }

    /// Text parts in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content_parts.iter().filter_map(ContentPart::as_text)
    }

    /// Function calls, in order.
    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.content_parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::FunctionCall { id, name, args } => Some(FunctionCall {
                    id: id.clone(),
                    name: name.clone(),
                    args: args.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Whether any part is a response from tool `name`.
    pub fn has_function_response_named(&self, name: &str) -> bool {
        self.content_parts.iter().any(
            |p| matches!(p, ContentPart::FunctionResponse { name: n, .. } if n == name),
        )
    }

    /// Whether the runtime flagged the event as interrupted.
    pub fn was_interrupted(&self) -> bool {
        self.custom_metadata
            .get(WAS_INTERRUPTED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether a tool queued artifacts for return during this turn.
    pub fn has_artifact_return_trigger(&self) -> bool {
        self.state_delta
            .keys()
            .any(|k| k.starts_with(ARTIFACT_RETURN_STATE_PREFIX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_calls_extracted_in_order() {
        let event = GenerationEvent::new(
            "inv-1",
            false,
            vec![
                ContentPart::text("thinking"),
                ContentPart::function_call("fc-1", "peer_Research", json!({"task_description": "a"})),
                ContentPart::function_call("fc-2", "peer_Writer", json!({})),
            ],
        );
        let calls = event.function_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "fc-1");
        assert_eq!(calls[1].name, "peer_Writer");
    }

    #[test]
    fn test_interrupted_and_artifact_flags() {
        let event = GenerationEvent::final_text("inv", "x")
            .with_metadata(WAS_INTERRUPTED_KEY, json!(true))
            .with_state_delta(format!("{ARTIFACT_RETURN_STATE_PREFIX}report.csv"), json!(1));
        assert!(event.was_interrupted());
        assert!(event.has_artifact_return_trigger());
        assert!(!GenerationEvent::partial_text("inv", "y").was_interrupted());
    }

    #[test]
    fn test_content_part_serde_tagging() {
        let part = ContentPart::text("hi");
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value, json!({"type": "text", "text": "hi"}));
    }
}
