//! In-process cache backend.
//!
//! Used for local development and tests. Expired entries are dropped lazily
//! on read and by [`MemoryCache::purge_expired`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheBackend, CacheError};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Concurrent in-memory [`CacheBackend`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let hit = self.entries.get(key).and_then(|entry| {
            if entry.expires_at > now {
                Some(entry.value.clone())
            } else {
                None
            }
        });

        if hit.is_none() {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }

        Ok(hit)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn second_set_resets_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", "old".into(), Duration::ZERO).await.unwrap();
        cache
            .set("k", "new".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn purge_drops_only_expired() {
        let cache = MemoryCache::new();
        cache.set("dead", "x".into(), Duration::ZERO).await.unwrap();
        cache
            .set("live", "y".into(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.purge_expired();
        assert_eq!(cache.entries.len(), 1);
    }

    #[tokio::test]
    async fn delete_absent_key_is_ok() {
        let cache = MemoryCache::new();
        assert!(cache.delete("missing").await.is_ok());
    }
}
