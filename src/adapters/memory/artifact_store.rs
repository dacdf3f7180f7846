//! In-memory versioned artifact store.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::ports::artifact_store::USER_NAMESPACE_PREFIX;
use crate::domain::ports::{ArtifactScope, ArtifactStore, LoadedArtifact};

/// Storage namespace: the session id, or `"user"` for `user:` filenames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ArtifactPath {
    app_name: String,
    user_id: String,
    namespace: String,
    filename: String,
}

#[derive(Debug, Clone)]
struct StoredVersion {
    mime_type: String,
    bytes: Vec<u8>,
}

/// Versioned artifacts kept in memory, with `user:` files shared across sessions.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: RwLock<HashMap<ArtifactPath, BTreeMap<u32, StoredVersion>>>,
}

impl InMemoryArtifactStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn path(scope: &ArtifactScope, filename: &str) -> ArtifactPath {
    let namespace = if filename.starts_with(USER_NAMESPACE_PREFIX) {
        "user".to_string()
    } else {
        scope.session_id.clone()
    };
    ArtifactPath {
        app_name: scope.app_name.clone(),
        user_id: scope.user_id.clone(),
        namespace,
        filename: filename.to_string(),
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn save(
        &self,
        scope: &ArtifactScope,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> OrchestrationResult<u32> {
        if filename.is_empty() {
            return Err(OrchestrationError::Artifact("filename cannot be empty".to_string()));
        }
        let mut artifacts = self.artifacts.write().await;
        let versions = artifacts.entry(path(scope, filename)).or_default();
        let version = versions.keys().next_back().map_or(0, |latest| latest + 1);
        versions.insert(
            version,
            StoredVersion {
                mime_type: mime_type.to_string(),
                bytes,
            },
        );
        Ok(version)
    }

    async fn load(
        &self,
        scope: &ArtifactScope,
        filename: &str,
        version: Option<u32>,
    ) -> OrchestrationResult<Option<LoadedArtifact>> {
        let artifacts = self.artifacts.read().await;
        let Some(versions) = artifacts.get(&path(scope, filename)) else {
            return Ok(None);
        };
        let found = match version {
            Some(v) => versions.get_key_value(&v),
            None => versions.iter().next_back(),
        };
        Ok(found.map(|(version, stored)| LoadedArtifact {
            filename: filename.to_string(),
            version: *version,
            mime_type: stored.mime_type.clone(),
            bytes: stored.bytes.clone(),
        }))
    }

    async fn list_versions(
        &self,
        scope: &ArtifactScope,
        filename: &str,
    ) -> OrchestrationResult<Vec<u32>> {
        Ok(self
            .artifacts
            .read()
            .await
            .get(&path(scope, filename))
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn list_keys(&self, scope: &ArtifactScope) -> OrchestrationResult<Vec<String>> {
        let artifacts = self.artifacts.read().await;
        let keys: BTreeSet<String> = artifacts
            .keys()
            .filter(|p| p.app_name == scope.app_name && p.user_id == scope.user_id)
            .filter(|p| p.namespace == scope.session_id || p.namespace == "user")
            .map(|p| p.filename.clone())
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn delete(&self, scope: &ArtifactScope, filename: &str) -> OrchestrationResult<()> {
        self.artifacts.write().await.remove(&path(scope, filename));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_versions_start_at_zero_and_increase() {
        let store = InMemoryArtifactStore::new();
        let scope = ArtifactScope::new("app", "u", "s1");
        assert_eq!(store.save(&scope, "a.txt", b"1".to_vec(), "text/plain").await.unwrap(), 0);
        assert_eq!(store.save(&scope, "a.txt", b"2".to_vec(), "text/plain").await.unwrap(), 1);
        assert_eq!(store.list_versions(&scope, "a.txt").await.unwrap(), vec![0, 1]);

        let latest = store.load(&scope, "a.txt", None).await.unwrap().unwrap();
        assert_eq!((latest.version, latest.bytes), (1, b"2".to_vec()));
        let first = store.load(&scope, "a.txt", Some(0)).await.unwrap().unwrap();
        assert_eq!(first.bytes, b"1".to_vec());
        assert!(store.load(&scope, "a.txt", Some(7)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_namespace_shared_across_sessions() {
        let store = InMemoryArtifactStore::new();
        let s1 = ArtifactScope::new("app", "u", "s1");
        let s2 = ArtifactScope::new("app", "u", "s2");
        store.save(&s1, "user:profile.json", b"{}".to_vec(), "application/json").await.unwrap();
        store.save(&s1, "b.txt", b"b".to_vec(), "text/plain").await.unwrap();
        store.save(&s2, "a.txt", b"a".to_vec(), "text/plain").await.unwrap();

        assert!(store.load(&s2, "user:profile.json", None).await.unwrap().is_some());
        assert!(store.load(&s2, "b.txt", None).await.unwrap().is_none());
        assert_eq!(
            store.list_keys(&s2).await.unwrap(),
            vec!["a.txt".to_string(), "user:profile.json".to_string()]
        );

        store.delete(&s1, "b.txt").await.unwrap();
        assert_eq!(store.list_keys(&s1).await.unwrap(), vec!["user:profile.json".to_string()]);
    }
}
