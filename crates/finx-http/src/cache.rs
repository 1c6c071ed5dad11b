//! Response cache contract and the in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::error::CollaboratorError;
use crate::transport::{BoxFuture, TransportResponse};

/// Cached response with an absolute expiry in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: TransportResponse,
    pub expires_at_ms: i64,
}

impl CacheEntry {
    pub fn new(value: TransportResponse, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            value,
            expires_at_ms: now_epoch_ms().saturating_add(ttl_ms),
        }
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_epoch_ms())
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

/// Cache collaborator. Errors fail open unless marked fail-closed.
pub trait Cache: Send + Sync {
    fn get<'a>(&'a self, key: &'a str)
        -> BoxFuture<'a, Result<Option<CacheEntry>, CollaboratorError>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>>;

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        let _ = key;
        Box::pin(async { Ok(()) })
    }
}

/// Cache that stores nothing.
#[derive(Debug, Default)]
pub struct NoopCache;

impl Cache for NoopCache {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, CollaboratorError>> {
        let _ = key;
        Box::pin(async { Ok(None) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        let _ = (key, entry);
        Box::pin(async { Ok(()) })
    }
}

/// Thread-safe in-process cache.
///
/// Entries are returned as stored, expired or not; expiry is decided by the caller.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<tokio::sync::RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired entries from the cache.
    pub async fn clear_expired(&self) {
        let now = now_epoch_ms();
        let mut map = self.inner.write().await;
        map.retain(|_, entry| !entry.is_expired_at(now));
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Number of entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl Cache for MemoryCache {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, CollaboratorError>> {
        Box::pin(async move { Ok(self.inner.read().await.get(key).cloned()) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        Box::pin(async move {
            self.inner.write().await.insert(key.to_owned(), entry);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        Box::pin(async move {
            self.inner.write().await.remove(key);
            Ok(())
        })
    }
}
