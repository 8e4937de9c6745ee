use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::CacheStore;

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-process [`CacheStore`], suitable for tests and single-node
/// deployments. Expiry is lazy: dead entries are dropped on access.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Option<String> {
        match self.entries.get(key) {
            Some(entry) if entry.live() => Some(entry.value.clone()),
            Some(_) => {
                drop(self.entries.remove(key));
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn set_nx(&self, key: &str, value: String, ttl: Duration) -> bool {
        let mut inserted = false;
        let entry = self
            .entries
            .entry(key.to_string())
            .and_modify(|existing| {
                if !existing.live() {
                    existing.value = value.clone();
                    existing.expires_at = Instant::now() + ttl;
                    inserted = true;
                }
            })
            .or_insert_with(|| {
                inserted = true;
                Entry {
                    value: value.clone(),
                    expires_at: Instant::now() + ttl,
                }
            });
        drop(entry);
        inserted
    }

    async fn take(&self, key: &str) -> Option<String> {
        let (_, entry) = self.entries.remove(key)?;
        entry.live().then_some(entry.value)
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() {
        let store = MemoryCacheStore::new();
        store.set("k", "v".into(), Duration::from_secs(60)).await;
        assert_eq!(store.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn expired_entry_is_gone() {
        let store = MemoryCacheStore::new();
        store.set("k", "v".into(), Duration::ZERO).await;
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn set_nx_refuses_live_entry() {
        let store = MemoryCacheStore::new();
        assert!(store.set_nx("lock", "a".into(), Duration::from_secs(60)).await);
        assert!(!store.set_nx("lock", "b".into(), Duration::from_secs(60)).await);
        assert_eq!(store.get("lock").await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn set_nx_reclaims_expired_entry() {
        let store = MemoryCacheStore::new();
        assert!(store.set_nx("lock", "a".into(), Duration::ZERO).await);
        assert!(store.set_nx("lock", "b".into(), Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn take_is_get_and_delete() {
        let store = MemoryCacheStore::new();
        store.set("marker", "1".into(), Duration::from_secs(60)).await;
        assert_eq!(store.take("marker").await.as_deref(), Some("1"));
        assert_eq!(store.take("marker").await, None);
    }
}
