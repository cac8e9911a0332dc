//! Cache backend and the typed aggregation cache built on top of it.

use crate::models::{AggregationResult, SubjectId};
use crate::services::metrics::record_cache_lookup;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Bump whenever the merge output changes shape or meaning; old entries then
/// stop matching and expire on their own.
pub const CACHE_VERSION: &str = "v3";

pub const ACCESS_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache transport error: {0}")]
    Transport(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Transport(err.to_string())
    }
}

/// String key-value store with expiry.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn health_check(&self) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own after transport failures
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            CacheError::from(e)
        })?;

        tracing::info!("Successfully connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        let value = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

/// In-memory cache that counts calls and can be switched to fail.
#[derive(Default)]
pub struct MockCache {
    entries: Mutex<HashMap<String, String>>,
    gets: AtomicUsize,
    sets: AtomicUsize,
    failing: AtomicBool,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache whose every call fails with a transport error.
    pub fn failing() -> Self {
        let cache = Self::default();
        cache.set_failing(true);
        cache
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    /// Store a raw value without counting it as a `set`.
    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    fn check_failing(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Transport("mock cache unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueCache for MockCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        let entries = self
            .entries
            .lock()
            .map_err(|e| CacheError::Transport(format!("Mock cache mutex poisoned: {}", e)))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        self.entries
            .lock()
            .map_err(|e| CacheError::Transport(format!("Mock cache mutex poisoned: {}", e)))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        self.check_failing()
    }
}

/// Hex SHA-256 of the subject and [`CACHE_VERSION`].
pub fn subject_cache_key(subject: &SubjectId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_str().as_bytes());
    hasher.update(CACHE_VERSION.as_bytes());
    hex::encode(hasher.finalize())
}

/// Typed view over a [`KeyValueCache`] for aggregation results.
///
/// Every failure is logged and swallowed: a failed read is a miss and a
/// failed write leaves the entry absent.
#[derive(Clone)]
pub struct AccessCache {
    backend: Arc<dyn KeyValueCache>,
    ttl: Duration,
}

impl AccessCache {
    pub fn new(backend: Arc<dyn KeyValueCache>) -> Self {
        Self {
            backend,
            ttl: ACCESS_TTL,
        }
    }

    pub async fn get(&self, key: &str) -> Option<AggregationResult> {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                record_cache_lookup("miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(subject_hash = %key, error = %e, "Access cache read failed, treating as miss");
                record_cache_lookup("error");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(result) => {
                record_cache_lookup("hit");
                Some(result)
            }
            Err(e) => {
                tracing::warn!(subject_hash = %key, error = %e, "Cached access entry unreadable, treating as miss");
                record_cache_lookup("error");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, result: &AggregationResult) {
        let raw = match serde_json::to_string(result) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(subject_hash = %key, error = %e, "Failed to serialize access entry");
                return;
            }
        };

        if let Err(e) = self.backend.set(key, &raw, self.ttl).await {
            tracing::warn!(subject_hash = %key, error = %e, "Access cache write failed");
        }
    }
}
