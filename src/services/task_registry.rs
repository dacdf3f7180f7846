//! Task registry and per-task execution contexts.
//!
//! Lock order: the registry's map lock is held only for an insert, lookup or
//! remove and is always released before a context lock is taken. No code path
//! holds two contexts' locks at once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::{
    ArtifactRef, GenerationEvent, LogicalTask, ParallelInvocationGroup, ResolvedInvocation,
    SubTaskCorrelation,
};

/// Mutable per-task state, guarded by the context mutex.
#[derive(Debug, Default)]
pub struct ContextState {
    /// Outstanding sub-tasks keyed by sub-task id
    pub sub_tasks: HashMap<String, SubTaskCorrelation>,
    /// Fan-out groups keyed by invocation id
    pub invocations: HashMap<String, ParallelInvocationGroup>,
    /// Streamed text not yet published
    pub streaming_buffer: String,
    /// Full text of a run-based task, returned in its final reply
    pub run_based_buffer: String,
    /// Artifacts reported on the completed reply, without duplicates
    pub produced_artifacts: Vec<ArtifactRef>,
    /// Artifacts queued for return on the next final event
    pub artifact_signals: VecDeque<ArtifactRef>,
    /// Set while the runtime waits on delegated tools
    pub paused: bool,
    /// Last final event seen, before any text stripping
    pub last_event: Option<GenerationEvent>,
    /// A runtime turn is currently streaming events for this task
    pub turn_active: bool,
    /// The current turn emitted partial text
    pub turn_streamed: bool,
    /// Resolution that arrived while a turn was still active
    pub pending_resume: Option<ResolvedInvocation>,
}

impl ContextState {
    /// Record an artifact for the completed reply's metadata. Repeats are ignored.
    pub fn record_produced_artifact(&mut self, artifact: ArtifactRef) {
        if !self.produced_artifacts.contains(&artifact) {
            self.produced_artifacts.push(artifact);
        }
    }
}

/// Everything the engine knows about one in-flight logical task.
pub struct TaskExecutionContext {
    task: LogicalTask,
    state: Mutex<ContextState>,
    cancellation: CancellationToken,
}

impl TaskExecutionContext {
    /// Fresh context with empty state and a live cancellation token.
    pub fn new(task: LogicalTask) -> Self {
        Self {
            task,
            state: Mutex::new(ContextState::default()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Immutable task description.
    pub fn task(&self) -> &LogicalTask {
        &self.task
    }

    /// Shorthand for `task().id`.
    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    /// Acquire the context lock. Never hold the guard across a publish or store call.
    pub async fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().await
    }

    /// Trip the cancellation token. Idempotent.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// A clone of the token, for `select!` against a turn's stream.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Mark the task as waiting on delegated tools, or not.
    pub async fn set_paused(&self, paused: bool) {
        self.lock().await.paused = paused;
    }

    /// Whether the task is waiting on delegated tools.
    pub async fn is_paused(&self) -> bool {
        self.lock().await.paused
    }

    /// Snapshot of sub-tasks that have not been claimed yet.
    pub async fn outstanding_sub_tasks(&self) -> Vec<SubTaskCorrelation> {
        self.lock().await.sub_tasks.values().cloned().collect()
    }

    /// Snapshot of produced artifacts in first-seen order.
    pub async fn produced_artifacts(&self) -> Vec<ArtifactRef> {
        self.lock().await.produced_artifacts.clone()
    }
}

impl std::fmt::Debug for TaskExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutionContext")
            .field("task", &self.task)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Registry of in-flight tasks.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<TaskExecutionContext>>>,
}

impl TaskRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task.
    ///
    /// # Errors
    /// Returns `TaskAlreadyExists` if a context with the same id is registered.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn create(&self, task: LogicalTask) -> OrchestrationResult<Arc<TaskExecutionContext>> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(OrchestrationError::TaskAlreadyExists(task.id));
        }
        let id = task.id.clone();
        let context = Arc::new(TaskExecutionContext::new(task));
        tasks.insert(id, Arc::clone(&context));
        debug!(active_tasks = tasks.len(), "Task registered");
        Ok(context)
    }

    /// Context for `task_id` if it is still in flight.
    pub async fn get(&self, task_id: &str) -> Option<Arc<TaskExecutionContext>> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Remove a task. Only the first caller for a given id gets the context back.
    pub async fn remove(&self, task_id: &str) -> Option<Arc<TaskExecutionContext>> {
        self.tasks.write().await.remove(task_id)
    }

    /// Number of in-flight tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether no task is in flight.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Ids of in-flight tasks, sorted.
    pub async fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SessionContext;

    fn task(id: &str) -> LogicalTask {
        LogicalTask::new(id, "agent", SessionContext::new("u", "s"))
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let registry = TaskRegistry::new();
        registry.create(task("t1")).await.unwrap();
        let err = registry.create(task("t1")).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::TaskAlreadyExists(id) if id == "t1"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_is_single_shot() {
        let registry = TaskRegistry::new();
        registry.create(task("t1")).await.unwrap();
        assert!(registry.remove("t1").await.is_some());
        assert!(registry.remove("t1").await.is_none());
        assert!(registry.get("t1").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_removal_has_one_winner() {
        let registry = Arc::new(TaskRegistry::new());
        registry.create(task("t1")).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.remove("t1").await.is_some() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_context_state_and_cancellation() {
        let registry = TaskRegistry::new();
        let ctx = registry.create(task("t1")).await.unwrap();
        {
            let mut state = ctx.lock().await;
            state.streaming_buffer.push_str("abc");
            state.record_produced_artifact(ArtifactRef::new("a.txt", Some(0)));
            state.record_produced_artifact(ArtifactRef::new("a.txt", Some(0)));
        }
        assert_eq!(ctx.produced_artifacts().await.len(), 1);
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(registry.get("t1").await.unwrap().is_cancelled());
    }
}
