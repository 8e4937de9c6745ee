mod memory;

pub use memory::MemoryCacheStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, warn};

use crate::retry::{calculate_backoff, jittered_ttl};

/// Base TTL for cached entities; every write jitters around this.
pub const ENTITY_TTL: Duration = Duration::from_secs(1600);
/// Lease on the single-flight lock; expires even if the holder crashes.
pub const LOCK_LEASE: Duration = Duration::from_secs(10);
/// How many poll rounds a loser waits before giving up.
const POLL_BUDGET: u8 = 3;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Another caller holds the miss lock and did not populate the value in
    /// time. Transient; the caller should surface a service-unavailable
    /// condition, not fall through to the origin store.
    #[error("cache contended for key '{0}'")]
    Contended(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Minimal key-value store contract the cache layer needs.
///
/// Implementations must expire entries on their own; `set_nx` is the
/// bounded-lease mutual exclusion primitive for single-flight misses and
/// `take` the atomic get-and-delete used by staleness markers.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    /// Set only if absent. Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: String, ttl: Duration) -> bool;
    /// Atomically read and delete. Returns the previous value, if any.
    async fn take(&self, key: &str) -> Option<String>;
    async fn delete(&self, key: &str);
}

/// Read-through cache with single-flight miss handling.
///
/// On a miss the first caller acquires an advisory `{key}:lock` and loads
/// from the origin; everyone else polls for the value with jittered backoff
/// and fails with [`CacheError::Contended`] once the budget runs out.
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn read_through<T, F, Fut, E>(
        &self,
        key: &str,
        loader: F,
    ) -> Result<Result<T, E>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.fetch::<T>(key).await {
            return Ok(Ok(value));
        }

        let lock_key = format!("{key}:lock");
        let mut attempt: u8 = 0;

        while !self.store.set_nx(&lock_key, "1".into(), LOCK_LEASE).await {
            attempt += 1;
            if attempt > POLL_BUDGET {
                warn!(key, "Cache poll budget exhausted");
                return Err(CacheError::Contended(key.to_string()));
            }
            tokio::time::sleep(calculate_backoff(attempt, 50, 2000)).await;
            if let Some(value) = self.fetch::<T>(key).await {
                return Ok(Ok(value));
            }
        }

        // Lock acquired. Re-check first: the previous holder may have
        // populated the value between our miss and our acquisition.
        if let Some(value) = self.fetch::<T>(key).await {
            self.store.delete(&lock_key).await;
            return Ok(Ok(value));
        }

        // This caller is responsible for populating the value.
        let result = loader().await;
        if let Ok(value) = &result {
            self.set(key, value).await?;
        }
        self.store.delete(&lock_key).await;
        Ok(result)
    }

    /// Read a cached value, tolerating decode failures as misses.
    pub async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Dropping undecodable cache entry");
                self.store.delete(key).await;
                None
            }
        }
    }

    /// Write a value with a jittered TTL.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value)?;
        let ttl = jittered_ttl(ENTITY_TTL);
        debug!(key, ttl_ms = ttl.as_millis() as u64, "Cache set");
        self.store.set(key, raw, ttl).await;
        Ok(())
    }

    pub async fn delete(&self, key: &str) {
        self.store.delete(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryCacheStore::new()))
    }

    #[tokio::test]
    async fn miss_loads_and_populates() {
        let cache = cache();
        let loaded: Result<u32, Infallible> = cache
            .read_through("answer", || async { Ok(42u32) })
            .await
            .unwrap();
        assert_eq!(loaded.unwrap(), 42);

        // Hit path: loader must not run again.
        let loaded: Result<u32, Infallible> = cache
            .read_through("answer", || async { panic!("loader ran on a hit") })
            .await
            .unwrap();
        assert_eq!(loaded.unwrap(), 42);
    }

    #[tokio::test]
    async fn loader_error_releases_lock() {
        let cache = cache();
        let result: Result<Result<u32, String>, _> = cache
            .read_through("broken", || async { Err("origin down".to_string()) })
            .await;
        assert!(result.unwrap().is_err());

        // A later caller can acquire the lock again.
        let loaded: Result<u32, String> = cache
            .read_through("broken", || async { Ok(7u32) })
            .await
            .unwrap();
        assert_eq!(loaded.unwrap(), 7);
    }

    #[tokio::test]
    async fn concurrent_misses_run_one_loader() {
        let store = Arc::new(MemoryCacheStore::new());
        let loads = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let loads = Arc::clone(&loads);
            handles.push(tokio::spawn(async move {
                let cache = Cache::new(store);
                cache
                    .read_through::<u32, _, _, Infallible>("hot", move || {
                        let loads = Arc::clone(&loads);
                        async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(42)
                        }
                    })
                    .await
            }));
        }

        let mut values = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(Ok(v)) => {
                    assert_eq!(v, 42);
                    values += 1;
                }
                Ok(Err(_)) => unreachable!(),
                // Contended is an acceptable outcome for losers with a
                // tiny poll budget; they must not have loaded.
                Err(CacheError::Contended(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(values >= 1);
    }

    #[tokio::test]
    async fn undecodable_entry_is_a_miss() {
        let store = Arc::new(MemoryCacheStore::new());
        store
            .set("weird", "not json".into(), Duration::from_secs(60))
            .await;
        let cache = Cache::new(store);
        assert_eq!(cache.fetch::<u32>("weird").await, None);
    }
}
