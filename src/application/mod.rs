//! Application layer: the agent host, the inbound router and the scheduler bridge.

pub mod agent_host;
pub mod router;
pub mod scheduler;

pub use agent_host::{AgentHost, HostPorts, InboundRequest};
pub use router::InboundRouter;
pub use scheduler::{DispatchTicket, Dispatcher, Scheduler};
