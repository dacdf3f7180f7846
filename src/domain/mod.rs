//! Domain layer for the weft orchestration engine
//!
//! Plain data models, the error taxonomy and the port traits every adapter implements.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    EmbedError, OrchestrationError, OrchestrationResult, RuntimeError, TransportError,
};
