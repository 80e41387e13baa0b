//! Session Cache
//! Mission: Track the single live refresh token per user, with expiry
//!
//! Backends report failures as values and never panic. The auth service
//! decides whether a failure is tolerable (issuing, logout) or must reject
//! the request (refresh validation).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

const KEY_PREFIX: &str = "refresh_token";

/// Cache key for a user's refresh token
pub fn refresh_key(user_id: Uuid) -> String {
    format!("{}:{}", KEY_PREFIX, user_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backend not connected or not reachable
    Unavailable,
    /// Backend answered with an error
    Backend(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Unavailable => write!(f, "Session cache unavailable"),
            CacheError::Backend(msg) => write!(f, "Session cache error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Key-value store with per-entry TTL, keyed by user id
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Store `token` for `user_id`, replacing any previous entry.
    async fn put(&self, user_id: Uuid, token: &str, ttl: Duration) -> CacheResult<()>;

    /// Current token, or `None` if absent or expired.
    async fn get(&self, user_id: Uuid) -> CacheResult<Option<String>>;

    /// Remove the entry. Removing a missing entry is not an error.
    async fn delete(&self, user_id: Uuid) -> CacheResult<()>;

    fn backend_name(&self) -> &'static str;
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process TTL cache
#[derive(Clone, Default)]
pub struct MemorySessionCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodic cleanup of expired entries (runs until the runtime shuts down)
    pub fn start_cleanup_task(&self, every: Duration) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, "Purged expired session cache entries");
                }
            }
        });
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn put(&self, user_id: Uuid, token: &str, ttl: Duration) -> CacheResult<()> {
        let entry = CacheEntry {
            value: token.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().insert(refresh_key(user_id), entry);
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> CacheResult<Option<String>> {
        let key = refresh_key(user_id);
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(&key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
            // Lazy eviction
            entries.remove(&key);
        }
        Ok(None)
    }

    async fn delete(&self, user_id: Uuid) -> CacheResult<()> {
        self.entries.lock().remove(&refresh_key(user_id));
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Stand-in used when no cache backend could be brought up.
/// Every operation fails with `CacheError::Unavailable`.
#[derive(Clone, Copy, Default)]
pub struct UnavailableSessionCache;

impl UnavailableSessionCache {
    pub fn new() -> Self {
        info!("Session cache disabled: refresh tokens cannot be validated");
        Self
    }
}

#[async_trait]
impl SessionCache for UnavailableSessionCache {
    async fn put(&self, _user_id: Uuid, _token: &str, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Unavailable)
    }

    async fn get(&self, _user_id: Uuid) -> CacheResult<Option<String>> {
        Err(CacheError::Unavailable)
    }

    async fn delete(&self, _user_id: Uuid) -> CacheResult<()> {
        Err(CacheError::Unavailable)
    }

    fn backend_name(&self) -> &'static str {
        "unavailable"
    }
}
