use crate::core::cache::Cache;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// Process-local cache. Expired entries are evicted when they are read or
/// purged.
pub struct MemoryCache<K, V> {
    inner: Arc<Mutex<HashMap<K, Entry<V>>>>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

impl<K, V> Default for MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Cache<K, V> for MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync + Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.inner.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => {
                debug!("Cache EXPIRED for key: {:?}", key);
                entries.remove(key);
                None
            }
            Some(entry) => {
                debug!("Cache HIT for key: {:?}", key);
                Some(entry.value.clone())
            }
            None => {
                debug!("Cache MISS for key: {:?}", key);
                None
            }
        }
    }

    async fn put(&self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at = ttl.map(|duration| Instant::now() + duration);
        debug!("Cache PUT for key: {:?} (ttl: {:?})", key, ttl);
        self.inner
            .lock()
            .await
            .insert(key, Entry { value, expires_at });
    }

    async fn remove(&self, key: &K) {
        self.inner.lock().await.remove(key);
        debug!("Cache REMOVE for key: {:?}", key);
    }

    async fn clear(&self) {
        self.inner.lock().await.clear();
        debug!("Cache CLEAR");
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}
