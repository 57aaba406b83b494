//! In-Process Cache Backend - RwLock-guarded HashMap
//!
//! Default `CacheBackend` for a single process. Entries are replaced
//! wholesale under the write lock, so concurrent readers always see
//! either the old or the new entry, never a partial one.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::ports::cache_store::{CacheBackend, CacheEntry};

/// HashMap-backed cache storage shared by every synchronizer.
pub struct MemoryCacheBackend<V> {
    /// Entries keyed by cache key.
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    /// Soft cap on stored entries; expired ones are pruned first.
    max_entries: usize,
}

impl<V> MemoryCacheBackend<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty backend holding at most `max_entries` keys.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every entry past its TTL. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Make room for one more key: expired entries first, then the oldest.
    fn evict_locked(entries: &mut HashMap<String, CacheEntry<V>>, max_entries: usize) {
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        while entries.len() >= max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    debug!(key = %key, "Evicting oldest cache entry");
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl<V> Default for MemoryCacheBackend<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl<V> CacheBackend<V> for MemoryCacheBackend<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn load(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, key: &str, entry: CacheEntry<V>) -> Result<()> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            Self::evict_locked(&mut entries, self.max_entries);
        }
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
