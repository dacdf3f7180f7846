//! Peer delegation domain models.
//!
//! A tool call that fans out to N peers becomes one [`ParallelInvocationGroup`]
//! and N [`SubTaskCorrelation`]s. Each correlation is destroyed exactly once,
//! when a response or a timeout claims it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::generation::ToolResponse;
use super::task::SessionContext;

/// Prefix of every sub-task id (and therefore every correlation-cache key).
pub const SUB_TASK_PREFIX: &str = "a2a_subtask_";

/// Prefix of runtime function names that delegate to a peer agent.
pub const PEER_TOOL_PREFIX: &str = "peer_";

/// Allocate a fresh sub-task id.
pub fn new_sub_task_id() -> String {
    format!("{SUB_TASK_PREFIX}{}", Uuid::new_v4().simple())
}

/// Whether `key` looks like a sub-task id (and so a correlation-cache key).
pub fn is_sub_task_id(key: &str) -> bool {
    key.starts_with(SUB_TASK_PREFIX) && key.len() > SUB_TASK_PREFIX.len()
}

/// Peer name addressed by a peer tool, or `None` for ordinary tools.
pub fn peer_name_from_tool(tool_name: &str) -> Option<&str> {
    tool_name
        .strip_prefix(PEER_TOOL_PREFIX)
        .filter(|name| !name.is_empty())
}

/// Everything needed to route a peer's answer back into the paused invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskCorrelation {
    /// Id the peer knows the work by.
    pub sub_task_id: String,
    /// Delegating task.
    pub parent_task_id: String,
    /// Paused runtime invocation.
    pub invocation_id: String,
    /// Peer agent the sub-task was sent to.
    pub peer_name: String,
    /// Runtime function call this sub-task answers
    pub function_call_id: String,
    /// Name of that function (the peer tool)
    pub tool_name: String,
    /// Session of the delegating task.
    pub session: SessionContext,
    /// When the request was published.
    pub submitted_at: DateTime<Utc>,
    /// Cache TTL the sub-task was submitted with.
    pub timeout: Duration,
}

/// How a sub-task contribution came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerOutcome {
    /// The peer returned a completed task.
    Completed,
    /// The peer failed, or the request could not be sent.
    Error,
    /// The correlation-cache entry expired first.
    TimedOut,
}

/// One peer's contribution to an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerResult {
    /// Claimed sub-task.
    pub sub_task_id: String,
    /// Peer that answered.
    pub peer_name: String,
    /// Function call the result answers.
    pub function_call_id: String,
    /// Peer tool name.
    pub tool_name: String,
    /// How the result came about.
    pub outcome: PeerOutcome,
    /// Tool response body returned to the runtime.
    pub payload: Value,
}

impl PeerResult {
    /// Successful peer response.
    pub fn completed(correlation: &SubTaskCorrelation, text: String, data: Vec<Value>) -> Self {
        let mut payload = json!({ "status": "completed", "result": text });
        if !data.is_empty() {
            payload["data"] = Value::Array(data);
        }
        Self::from_correlation(correlation, PeerOutcome::Completed, payload)
    }

    /// The peer answered with an error.
    pub fn error(correlation: &SubTaskCorrelation, message: impl Into<String>) -> Self {
        let payload = json!({ "status": "error", "message": message.into() });
        Self::from_correlation(correlation, PeerOutcome::Error, payload)
    }

    /// Synthesized when the correlation-cache entry expired first.
    pub fn timed_out(correlation: &SubTaskCorrelation) -> Self {
        let payload = json!({
            "status": "timeout",
            "message": format!(
                "Peer agent '{}' did not respond within {} seconds.",
                correlation.peer_name,
                correlation.timeout.as_secs()
            ),
        });
        Self::from_correlation(correlation, PeerOutcome::TimedOut, payload)
    }

    fn from_correlation(correlation: &SubTaskCorrelation, outcome: PeerOutcome, payload: Value) -> Self {
        Self {
            sub_task_id: correlation.sub_task_id.clone(),
            peer_name: correlation.peer_name.clone(),
            function_call_id: correlation.function_call_id.clone(),
            tool_name: correlation.tool_name.clone(),
            outcome,
            payload,
        }
    }

    /// Convert into the response injected on resume.
    pub fn into_tool_response(self) -> ToolResponse {
        ToolResponse {
            function_call_id: self.function_call_id,
            name: self.tool_name,
            response: self.payload,
        }
    }
}

/// Fan-out bookkeeping for one paused invocation.
///
/// A group resolves once it is sealed (every sub-task of the fan-out has been
/// submitted) and every submitted sub-task has been claimed. Resolution hands
/// the results out exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelInvocationGroup {
    /// Paused invocation.
    pub invocation_id: String,
    /// Sub-tasks successfully submitted.
    pub expected_count: usize,
    /// Sub-tasks claimed so far.
    pub completed_count: usize,
    /// Results in claim order.
    pub results: Vec<PeerResult>,
    sealed: bool,
    resolved: bool,
}

impl ParallelInvocationGroup {
    /// Empty, unsealed group.
    pub fn new(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            expected_count: 0,
            completed_count: 0,
            results: Vec::new(),
            sealed: false,
            resolved: false,
        }
    }

    /// Count one more submitted sub-task.
    pub fn register_submission(&mut self) {
        self.expected_count += 1;
    }

    /// Undo a submission whose publish failed.
    pub fn withdraw_submission(&mut self) {
        self.expected_count = self.expected_count.saturating_sub(1);
    }

    /// Nothing submitted and nothing recorded.
    pub fn is_empty(&self) -> bool {
        self.expected_count == 0 && self.results.is_empty()
    }

    /// No more submissions will be registered.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Whether the fan-out is fully submitted.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether results were already handed out.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Record a claimed sub-task's result.
    pub fn record(&mut self, result: PeerResult) {
        self.results.push(result);
        self.completed_count += 1;
    }

    /// Sealed, not yet resolved, and every submission claimed.
    pub fn is_ready(&self) -> bool {
        self.sealed && !self.resolved && self.completed_count >= self.expected_count
    }

    /// Mark resolved and take the accumulated results. Returns `None` unless
    /// the group is ready, so only the first caller ever gets the results.
    pub fn try_resolve(&mut self) -> Option<Vec<PeerResult>> {
        if !self.is_ready() {
            return None;
        }
        self.resolved = true;
        Some(std::mem::take(&mut self.results))
    }
}

/// A group that just resolved; carries what the single resume needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInvocation {
    /// Task to resume.
    pub task_id: String,
    /// Invocation the results answer.
    pub invocation_id: String,
    /// One result per submitted or locally failed sub-task.
    pub results: Vec<PeerResult>,
}

impl ResolvedInvocation {
    /// Results as tool responses for the runtime.
    pub fn tool_responses(&self) -> Vec<ToolResponse> {
        self.results
            .iter()
            .cloned()
            .map(PeerResult::into_tool_response)
            .collect()
    }
}
