//! Artifact store port.

use async_trait::async_trait;

use crate::domain::errors::OrchestrationResult;

/// Filenames starting with this prefix live in the user namespace,
/// shared across all of the user's sessions.
pub const USER_NAMESPACE_PREFIX: &str = "user:";

/// Coordinates of an artifact collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactScope {
    /// Owning application (the agent name).
    pub app_name: String,
    /// Artifact owner.
    pub user_id: String,
    /// Session namespace.
    pub session_id: String,
}

impl ArtifactScope {
    /// Scope for one session.
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// Raw artifact content returned by [`ArtifactStore::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedArtifact {
    /// File name.
    pub filename: String,
    /// Loaded version.
    pub version: u32,
    /// MIME type recorded at save time.
    pub mime_type: String,
    /// Raw content.
    pub bytes: Vec<u8>,
}

/// Versioned artifact persistence. Versions are per filename, start at 0
/// and increase by one on every save.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a new version and return its number.
    async fn save(
        &self,
        scope: &ArtifactScope,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> OrchestrationResult<u32>;

    /// Load a version, or the latest when `version` is `None`.
    async fn load(
        &self,
        scope: &ArtifactScope,
        filename: &str,
        version: Option<u32>,
    ) -> OrchestrationResult<Option<LoadedArtifact>>;

    /// Saved versions of `filename`, ascending.
    async fn list_versions(&self, scope: &ArtifactScope, filename: &str)
        -> OrchestrationResult<Vec<u32>>;

    /// Sorted filenames visible from `scope` (session and user namespace).
    async fn list_keys(&self, scope: &ArtifactScope) -> OrchestrationResult<Vec<String>>;

    /// Remove every version of `filename`.
    async fn delete(&self, scope: &ArtifactScope, filename: &str) -> OrchestrationResult<()>;
}
