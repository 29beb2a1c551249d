use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key-value store with per-entry TTL, used for result memoization and progress records.
///
/// Keys are immutable strings; implementations must be safe for concurrent use.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> eyre::Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> eyre::Result<()>;
}

pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> eyre::Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> eyre::Result<()> {
    store.set(key, serde_json::to_string(value)?, ttl).await
}

#[derive(Clone)]
struct Entry {
    value: Arc<str>,
    ttl: Duration,
}

struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-local store backed by a bounded moka cache.
pub struct MemoryStore {
    entries: Cache<String, Entry>,
}

impl MemoryStore {
    pub fn new(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(EntryTtl)
                .build(),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> eyre::Result<Option<String>> {
        Ok(self.entries.get(key).await.map(|e| e.value.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> eyre::Result<()> {
        self.entries
            .insert(
                key.to_string(),
                Entry {
                    value: Arc::from(value),
                    ttl,
                },
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_overwrite() {
        let store = MemoryStore::new(100);
        store.set("progress:abc", "one".to_string(), Duration::from_secs(60)).await.unwrap();
        store.set("progress:abc", "two".to_string(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("progress:abc").await.unwrap().as_deref(), Some("two"));
        assert_eq!(store.get("progress:missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryStore::new(100);
        store.set("short", "v".to_string(), Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStore::new(100);
        set_json(&store, "k", &vec![1.5f64, 2.5], Duration::from_secs(60)).await.unwrap();
        let back: Option<Vec<f64>> = get_json(&store, "k").await.unwrap();
        assert_eq!(back, Some(vec![1.5, 2.5]));
    }
}
