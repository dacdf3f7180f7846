//! Orchestration services: task registry, delegation, streaming, interception and finalization.

pub mod delegation_coordinator;
pub mod embeds;
pub mod finalization;
pub mod interceptors;
pub mod outbound;
pub mod stream_processor;
pub mod task_registry;

pub use delegation_coordinator::{DelegationCoordinator, PeerCall};
pub use finalization::{FinalizationManager, FinalizeReport, Settlement, TaskOutcome};
pub use interceptors::{GenerationInterceptor, InterceptDecision, InterceptorChain};
pub use outbound::OutboundPublisher;
pub use stream_processor::{FlushOutcome, StreamProcessor};
pub use task_registry::{ContextState, TaskExecutionContext, TaskRegistry};
