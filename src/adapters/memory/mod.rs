//! In-process implementations of every port.
//!
//! Used by the test suites and by hosts that embed the engine in one process.

mod artifact_store;
mod inbound;
mod session_store;
mod transport;
mod ttl_cache;

pub use artifact_store::InMemoryArtifactStore;
pub use inbound::RecordingInboundMessage;
pub use session_store::InMemorySessionStore;
pub use transport::{PublishedMessage, RecordingTransport};
pub use ttl_cache::TtlCache;
