//! Generation event interceptors.
//!
//! An ordered chain run around the processing of each runtime event. `before`
//! may rewrite the event or skip it; the first `Skip` short-circuits the rest
//! of the chain and the event is dropped. `after` runs in the same order for
//! events that were processed.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::domain::models::generation::CONTINUE_GENERATION_TOOL;
use crate::domain::models::{GenerationEvent, LogicalTask};

/// Decision returned by [`GenerationInterceptor::before`].
#[derive(Debug, Clone, PartialEq)]
pub enum InterceptDecision {
    /// Keep processing this (possibly rewritten) event.
    Continue(GenerationEvent),
    /// Drop the event.
    Skip,
}

/// Hook run around each runtime event.
pub trait GenerationInterceptor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Inspect or rewrite `event` before it is processed.
    fn before(&self, _task: &LogicalTask, event: GenerationEvent) -> InterceptDecision {
        InterceptDecision::Continue(event)
    }

    /// Observe an event after it was processed.
    fn after(&self, _task: &LogicalTask, _event: &GenerationEvent) {}
}

/// Drops responses of the runtime's internal continuation tool.
#[derive(Debug, Default)]
pub struct ContinuationResponseFilter;

impl GenerationInterceptor for ContinuationResponseFilter {
    fn name(&self) -> &'static str {
        "continuation_response_filter"
    }

    fn before(&self, _task: &LogicalTask, event: GenerationEvent) -> InterceptDecision {
        if event.has_function_response_named(CONTINUE_GENERATION_TOOL) {
            InterceptDecision::Skip
        } else {
            InterceptDecision::Continue(event)
        }
    }
}

/// Drops events superseded by an interruption.
#[derive(Debug, Default)]
pub struct InterruptedEventFilter;

impl GenerationInterceptor for InterruptedEventFilter {
    fn name(&self) -> &'static str {
        "interrupted_event_filter"
    }

    fn before(&self, _task: &LogicalTask, event: GenerationEvent) -> InterceptDecision {
        if event.was_interrupted() {
            InterceptDecision::Skip
        } else {
            InterceptDecision::Continue(event)
        }
    }
}

/// Ordered interceptors.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn GenerationInterceptor>>,
}

impl InterceptorChain {
    /// Empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain with the built-in filters.
    pub fn with_defaults() -> Self {
        let mut chain = Self::new();
        chain.push(Arc::new(ContinuationResponseFilter));
        chain.push(Arc::new(InterruptedEventFilter));
        chain
    }

    /// Append to the end of the chain.
    pub fn push(&mut self, interceptor: Arc<dyn GenerationInterceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Number of interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether the chain has no interceptors.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run every `before` in order. `None` means the event was skipped.
    pub fn run_before(&self, task: &LogicalTask, event: GenerationEvent) -> Option<GenerationEvent> {
        let mut current = event;
        for interceptor in &self.interceptors {
            match interceptor.before(task, current) {
                InterceptDecision::Continue(next) => current = next,
                InterceptDecision::Skip => {
                    debug!(task_id = %task.id, interceptor = interceptor.name(), "Event skipped");
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Run every `after` in order.
    pub fn run_after(&self, task: &LogicalTask, event: &GenerationEvent) {
        for interceptor in &self.interceptors {
            trace!(interceptor = interceptor.name(), "after");
            interceptor.after(task, event);
        }
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.interceptors.iter().map(|i| i.name()).collect();
        f.debug_struct("InterceptorChain").field("interceptors", &names).finish()
    }
}
