//! Domain models: tasks, generation events, delegation state, A2A wire shapes and configuration.

pub mod a2a;
pub mod config;
pub mod delegation;
pub mod generation;
pub mod task;
pub mod topics;

pub use config::{ArtifactHandlingMode, Config, InterAgentConfig, LoggingConfig};
pub use delegation::{
    ParallelInvocationGroup, PeerOutcome, PeerResult, ResolvedInvocation, SubTaskCorrelation,
    PEER_TOOL_PREFIX, SUB_TASK_PREFIX,
};
pub use generation::{ContentPart, FunctionCall, GenerationEvent, ToolResponse};
pub use task::{ArtifactRef, LogicalTask, SessionBehavior, SessionContext, TaskOrigin, TaskState};
