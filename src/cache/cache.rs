//! Bounded store-and-forward buffer, server-side only.

use crate::cache::error::{CacheError, CacheResult};
use crate::cache::storage::Storage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A message retained for replay to reconnecting peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    /// Content-derived message id
    pub message_id: String,

    /// Peer the message was first received from
    pub origin: String,

    /// Raw wire bytes, replayed verbatim
    pub raw: Vec<u8>,

    /// Sender-assigned version nonce
    pub nonce: u64,

    /// Expiry as unix seconds
    pub expire: i64,
}

impl CachedEntry {
    /// Check whether the entry's own expiry has passed
    pub fn is_expired(&self, now: i64) -> bool {
        self.expire <= now
    }
}

/// Bounded, expiry-driven message cache over a storage collaborator
pub struct MessageCache {
    storage: Arc<dyn Storage>,
    max_entries: usize,
    inserted: AtomicU64,
    duplicates: AtomicU64,
    pruned: AtomicU64,
}

impl MessageCache {
    pub fn new(storage: Arc<dyn Storage>, max_entries: usize) -> Self {
        Self {
            storage,
            max_entries,
            inserted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
        }
    }

    /// Insert a message, or no-op if the id is already retained.
    ///
    /// Returns `true` when the entry was newly inserted. Same id implies
    /// same content, so duplicates are never replaced.
    pub fn set(
        &self,
        message_id: &str,
        origin: &str,
        raw: Vec<u8>,
        expire: i64,
        nonce: u64,
    ) -> CacheResult<bool> {
        if self.storage.get(message_id)?.is_some() {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }

        let now = chrono::Utc::now().timestamp();
        if expire <= now {
            return Err(CacheError::Expired(message_id.to_string()));
        }

        if self.len() >= self.max_entries {
            return Err(CacheError::CapacityExceeded(self.max_entries));
        }

        self.storage.set(
            message_id,
            CachedEntry {
                message_id: message_id.to_string(),
                origin: origin.to_string(),
                raw,
                nonce,
                expire,
            },
        )?;
        self.inserted.fetch_add(1, Ordering::Relaxed);

        Ok(true)
    }

    /// All retained entries, candidates for replay.
    /// A storage fault degrades to an empty candidate set.
    pub fn get(&self) -> Vec<CachedEntry> {
        match self.storage.entries() {
            Ok(entries) => entries.into_iter().map(|(_, e)| e).collect(),
            Err(e) => {
                tracing::warn!("cache read failed, no replay candidates: {}", e);
                Vec::new()
            }
        }
    }

    /// Remove every entry whose expiry has passed.
    ///
    /// Invoked once per heartbeat tick; calling it twice consecutively is
    /// a no-op the second time. Returns the removed message ids.
    pub fn prune(&self) -> Vec<String> {
        let now = chrono::Utc::now().timestamp();

        let entries = match self.storage.entries() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("cache read failed, prune skipped: {}", e);
                return Vec::new();
            }
        };

        let mut removed = Vec::new();
        for (id, entry) in entries {
            if !entry.is_expired(now) {
                continue;
            }
            match self.storage.delete(&id) {
                Ok(_) => removed.push(id),
                Err(e) => tracing::warn!(message_id = %id, "cache delete failed: {}", e),
            }
        }

        self.pruned
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        removed
    }

    /// Current number of retained entries
    pub fn len(&self) -> usize {
        self.storage.entries().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len() as u64,
            max_entries: self.max_entries as u64,
            inserted: self.inserted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: u64,
    pub max_entries: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub pruned: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {}/{} entries, {} inserted, {} dup, {} pruned",
            self.entries, self.max_entries, self.inserted, self.duplicates, self.pruned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::{MemoryStorage, Storage};

    fn test_cache(max: usize) -> MessageCache {
        MessageCache::new(Arc::new(MemoryStorage::new()), max)
    }

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn get(&self, _key: &str) -> CacheResult<Option<CachedEntry>> {
            Err(CacheError::Storage("disk offline".to_string()))
        }

        fn set(&self, _key: &str, _value: CachedEntry) -> CacheResult<()> {
            Err(CacheError::Storage("disk offline".to_string()))
        }

        fn delete(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Storage("disk offline".to_string()))
        }

        fn entries(&self) -> CacheResult<Vec<(String, CachedEntry)>> {
            Err(CacheError::Storage("disk offline".to_string()))
        }
    }

    fn future() -> i64 {
        chrono::Utc::now().timestamp() + 60
    }

    #[test]
    fn test_set_and_get() {
        let cache = test_cache(16);

        cache.set("m1", "peer-1", vec![1, 2, 3], future(), 1).unwrap();

        let entries = cache.get();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message_id, "m1");
        assert_eq!(entries[0].raw, vec![1, 2, 3]);
    }

    #[test]
    fn test_duplicate_id_is_noop() {
        let cache = test_cache(16);

        assert!(cache.set("m1", "peer-1", vec![1], future(), 1).unwrap());
        assert!(!cache.set("m1", "peer-2", vec![2], future(), 2).unwrap());

        let entries = cache.get();
        assert_eq!(entries.len(), 1);
        // First insertion wins
        assert_eq!(entries[0].origin, "peer-1");
        assert_eq!(entries[0].raw, vec![1]);
    }

    #[test]
    fn test_expired_entry_rejected() {
        let cache = test_cache(16);

        let past = chrono::Utc::now().timestamp() - 20;
        let result = cache.set("m1", "peer-1", vec![1], past, 1);

        assert!(matches!(result, Err(CacheError::Expired(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_limit() {
        let cache = test_cache(2);

        cache.set("m1", "peer-1", vec![1], future(), 1).unwrap();
        cache.set("m2", "peer-1", vec![2], future(), 1).unwrap();

        let result = cache.set("m3", "peer-1", vec![3], future(), 1);
        assert!(matches!(result, Err(CacheError::CapacityExceeded(2))));
    }

    #[test]
    fn test_prune_removes_only_expired() {
        let cache = test_cache(16);
        let now = chrono::Utc::now().timestamp();

        cache.set("m-live", "peer-1", vec![1], now + 60, 1).unwrap();
        cache.set("m-dying", "peer-1", vec![2], now + 1, 1).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(1100));

        let pruned = cache.prune();
        assert_eq!(pruned, vec!["m-dying".to_string()]);
        assert_eq!(cache.len(), 1);

        // Second consecutive call is a no-op
        assert!(cache.prune().is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_storage_fault_degrades_to_noop() {
        let cache = MessageCache::new(Arc::new(FailingStorage), 16);

        let result = cache.set("m1", "peer-1", vec![1], future(), 1);
        assert!(matches!(result, Err(CacheError::Storage(_))));

        assert!(cache.get().is_empty());
        assert!(cache.prune().is_empty());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_stats() {
        let cache = test_cache(16);

        cache.set("m1", "peer-1", vec![1], future(), 1).unwrap();
        cache.set("m1", "peer-1", vec![1], future(), 1).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.duplicates, 1);
    }
}
