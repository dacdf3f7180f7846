//! Expiring key/value cache port.

use std::time::Duration;

/// An entry whose TTL elapsed before it was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheExpiry {
    /// The expired key.
    pub key: String,
    /// Value stored under it.
    pub value: String,
}

/// TTL cache provided by the transport.
///
/// Implementations deliver a [`CacheExpiry`] asynchronously for every entry
/// that expires without being removed. Delivery may repeat; consumers must
/// tolerate duplicates.
pub trait ExpiringCache: Send + Sync {
    /// Insert or replace `key`, restarting its TTL.
    fn put(&self, key: &str, value: &str, ttl: Duration);

    /// Current value of `key`, if not yet expired or removed.
    fn get(&self, key: &str) -> Option<String>;

    /// Remove `key`, cancelling its pending expiry. Returns the removed value.
    fn remove(&self, key: &str) -> Option<String>;
}
