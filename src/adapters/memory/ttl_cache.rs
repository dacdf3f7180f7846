//! TTL cache whose expiries arrive on a channel.
//!
//! Each entry owns a timer task. A generation number guards against a timer
//! from a replaced entry expiring its successor. Timers use `tokio::time`,
//! so paused-clock tests control expiry precisely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::domain::ports::{CacheExpiry, ExpiringCache};

struct Entry {
    value: String,
    generation: u64,
    timer: JoinHandle<()>,
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

/// Expiring cache backed by one tokio timer per entry.
pub struct TtlCache {
    entries: Entries,
    expiries: mpsc::UnboundedSender<CacheExpiry>,
    next_generation: AtomicU64,
}

impl TtlCache {
    /// Create a cache and the receiver its expiries are delivered to.
    ///
    /// Must be used from within a tokio runtime.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CacheExpiry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            expiries: tx,
            next_generation: AtomicU64::new(0),
        };
        (cache, rx)
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no entry is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an expiry notification again, as a redelivering broker would.
    pub fn redeliver(&self, expiry: CacheExpiry) {
        let _ = self.expiries.send(expiry);
    }
}

impl ExpiringCache for TtlCache {
    fn put(&self, key: &str, value: &str, ttl: Duration) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let timer = {
            let entries = Arc::clone(&self.entries);
            let expiries = self.expiries.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                let expired = {
                    let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
                    match entries.get(&key) {
                        Some(entry) if entry.generation == generation => {
                            entries.remove(&key).map(|entry| entry.value)
                        }
                        _ => None,
                    }
                };
                if let Some(value) = expired {
                    trace!(key = %key, "Cache entry expired");
                    let _ = expiries.send(CacheExpiry { key, value });
                }
            })
        };

        let replaced = entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                generation,
                timer,
            },
        );
        if let Some(old) = replaced {
            old.timer.abort();
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|entry| entry.value.clone())
    }

    fn remove(&self, key: &str) -> Option<String> {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)?;
        removed.timer.abort();
        Some(removed.value)
    }
}

impl Drop for TtlCache {
    fn drop(&mut self) {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.values() {
            entry.timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let (cache, mut expiries) = TtlCache::new();
        cache.put("a2a_subtask_1", "task-1", Duration::from_secs(5));
        let start = tokio::time::Instant::now();

        let expiry = expiries.recv().await.unwrap();
        assert_eq!(expiry.key, "a2a_subtask_1");
        assert_eq!(expiry.value, "task-1");
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(cache.get("a2a_subtask_1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_entry_never_expires() {
        let (cache, mut expiries) = TtlCache::new();
        cache.put("k", "v", Duration::from_secs(1));
        assert_eq!(cache.remove("k").as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(expiries.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_restarts_ttl() {
        let (cache, mut expiries) = TtlCache::new();
        cache.put("k", "old", Duration::from_secs(1));
        cache.put("k", "new", Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(expiries.try_recv().is_err());
        assert_eq!(cache.get("k").as_deref(), Some("new"));
        let expiry = expiries.recv().await.unwrap();
        assert_eq!(expiry.value, "new");
    }
}
