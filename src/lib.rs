//! Weft - agent task orchestration and peer-delegation engine
//!
//! Weft hosts an agent on a pub/sub mesh: it accepts task requests, drives
//! the agent runtime's event stream, delegates `peer_*` tool calls to other
//! agents, correlates their replies (or timeouts) back to the waiting task,
//! and finalizes every task with exactly one terminal response.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, wire shapes, errors and port traits
//! - **Service Layer** (`services`): registry, delegation, streaming, finalization
//! - **Application Layer** (`application`): the agent host and scheduler bridge
//! - **Adapters** (`adapters`): in-memory implementations of every port
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): the `weft` binary's commands

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use application::{AgentHost, Dispatcher, HostPorts, InboundRequest, InboundRouter, Scheduler};
pub use domain::errors::{OrchestrationError, OrchestrationResult};
pub use domain::models::{Config, LoggingConfig, SessionBehavior, TaskState};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{FinalizeReport, TaskOutcome};
