//! Typed key/value cache with TTLs and namespaced keys.
//!
//! A [`CacheBackend`] stores raw strings; [`TypedCache`] layers JSON encoding
//! and the `{namespace}:{id}` key scheme on top. Each cached type declares its
//! own namespace through [`Cacheable::NAMESPACE`], so two entity kinds can share
//! an id without sharing a key.
//!
//! `get` distinguishes a miss (`Ok(None)`) from a backend failure (`Err`);
//! callers that gate access on a cached value must treat `Err` as a failure,
//! never as a miss.

pub mod memory;
pub mod redis;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use memory::MemoryCache;
pub use self::redis::RedisCache;

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Raw string storage with per-key expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value; `Ok(None)` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a value, replacing any existing one and resetting its TTL.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// A value that can live in a [`TypedCache`].
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync {
    /// Key namespace for this entity kind.
    const NAMESPACE: &'static str;

    /// Id of this value within its namespace.
    fn cache_id(&self) -> String;

    /// How long a stored value lives.
    fn ttl(&self) -> Duration;
}

/// Build the backend key for `id` in `namespace`.
pub fn cache_key(namespace: &str, id: &str) -> String {
    format!("{namespace}:{id}")
}

/// JSON-encoded, namespaced view over a [`CacheBackend`].
pub struct TypedCache<T> {
    backend: Arc<dyn CacheBackend>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedCache<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            _marker: PhantomData,
        }
    }
}

impl<T: Cacheable> TypedCache<T> {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            _marker: PhantomData,
        }
    }

    /// Store `value` under its own id with its declared TTL.
    pub async fn store(&self, value: &T) -> Result<(), CacheError> {
        let key = cache_key(T::NAMESPACE, &value.cache_id());
        let encoded = serde_json::to_string(value)?;
        self.backend.set(&key, encoded, value.ttl()).await
    }

    /// Fetch the value stored under `id`.
    pub async fn get(&self, id: &str) -> Result<Option<T>, CacheError> {
        let key = cache_key(T::NAMESPACE, id);
        match self.backend.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Remove the value stored under `id`.
    pub async fn delete(&self, id: &str) -> Result<(), CacheError> {
        self.backend.delete(&cache_key(T::NAMESPACE, id)).await
    }
}
