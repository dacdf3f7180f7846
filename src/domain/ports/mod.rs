//! Port trait definitions (Hexagonal Architecture)
//!
//! Every external seam the engine touches is a trait here:
//! - Transport / InboundMessage: pub/sub publish and message settlement
//! - ExpiringCache: TTL entries whose expiry drives peer timeouts
//! - AgentRuntime: the generation engine that emits events and is resumed
//! - SessionStore / ArtifactStore: persistence consulted during finalization
//!
//! Adapters in `crate::adapters` implement these; services depend only on the traits.

pub mod agent_runtime;
pub mod artifact_store;
pub mod expiring_cache;
pub mod session_store;
pub mod transport;

pub use agent_runtime::{AgentRuntime, EventStream, RunRequest};
pub use artifact_store::{ArtifactScope, ArtifactStore, LoadedArtifact};
pub use expiring_cache::{CacheExpiry, ExpiringCache};
pub use session_store::SessionStore;
pub use transport::{InboundMessage, MessageProperties, Transport};
