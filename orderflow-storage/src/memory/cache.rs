//! In-memory TTL cache.

use async_trait::async_trait;
use orderflow_core::{CacheError, CacheResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::traits::OrderCache;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    ttl: Duration,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    unavailable: bool,
    deletes: Vec<String>,
}

/// Byte-level cache with lazy expiry.
///
/// Uses tokio's clock so paused-time tests can drive expiry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    state: Arc<Mutex<CacheState>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `CacheError::Unavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Store bytes directly, bypassing the unavailable switch.
    pub async fn seed(&self, key: &str, value: &[u8], ttl: Duration) {
        self.state.lock().await.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// TTL the live entry under `key` was written with.
    pub async fn ttl_of(&self, key: &str) -> Option<Duration> {
        let state = self.state.lock().await;
        state
            .entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.ttl)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.ttl_of(key).await.is_some()
    }

    /// Keys passed to `delete`, in call order.
    pub async fn deleted_keys(&self) -> Vec<String> {
        self.state.lock().await.deletes.clone()
    }

    fn unavailable() -> CacheError {
        CacheError::Unavailable {
            reason: "in-memory cache switched off".to_string(),
        }
    }
}

#[async_trait]
impl OrderCache for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(Self::unavailable());
        }
        match state.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                state.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(Self::unavailable());
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(Self::unavailable());
        }
        state.deletes.push(key.to_string());
        state.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        if self.state.lock().await.unavailable {
            return Err(Self::unavailable());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(cache.ttl_of("k").await, Some(Duration::from_secs(60)));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.deleted_keys().await, vec!["k".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v", Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_operation() {
        let cache = InMemoryCache::new();
        cache.set_unavailable(true).await;

        assert!(cache.get("k").await.is_err());
        assert!(cache.set("k", b"v", Duration::from_secs(1)).await.is_err());
        assert!(cache.delete("k").await.is_err());
        assert!(cache.ping().await.is_err());

        cache.set_unavailable(false).await;
        assert!(cache.ping().await.is_ok());
    }
}
