//! Storage collaborator interface for the message cache
//!
//! The cache never assumes a specific storage technology; it reaches
//! persistence only through this narrow get/set/delete/entries interface.

use crate::cache::cache::CachedEntry;
use crate::cache::error::CacheResult;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Narrow key/value interface the message cache is written against.
///
/// Durable implementations store entries keyed by message id with no
/// ordering guarantees across entries. A failing operation surfaces as
/// `CacheError::Storage`; callers degrade to a no-op for that operation.
pub trait Storage: Send + Sync {
    /// Look up an entry by message id
    fn get(&self, key: &str) -> CacheResult<Option<CachedEntry>>;

    /// Insert or replace an entry
    fn set(&self, key: &str, value: CachedEntry) -> CacheResult<()>;

    /// Remove an entry, returning whether it existed
    fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Snapshot of all retained entries
    fn entries(&self) -> CacheResult<Vec<(String, CachedEntry)>>;
}

/// In-memory storage backend
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> CacheResult<Option<CachedEntry>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: CachedEntry) -> CacheResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn entries(&self) -> CacheResult<Vec<(String, CachedEntry)>> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> CachedEntry {
        CachedEntry {
            message_id: id.to_string(),
            origin: "peer-1".to_string(),
            raw: vec![1, 2, 3],
            nonce: 1,
            expire: chrono::Utc::now().timestamp() + 60,
        }
    }

    #[test]
    fn test_set_get_delete() {
        let storage = MemoryStorage::new();

        storage.set("m1", entry("m1")).unwrap();
        assert!(storage.get("m1").unwrap().is_some());
        assert!(storage.get("m2").unwrap().is_none());

        assert!(storage.delete("m1").unwrap());
        assert!(!storage.delete("m1").unwrap());
        assert!(storage.get("m1").unwrap().is_none());
    }

    #[test]
    fn test_entries_snapshot() {
        let storage = MemoryStorage::new();

        storage.set("m1", entry("m1")).unwrap();
        storage.set("m2", entry("m2")).unwrap();

        let mut ids: Vec<_> = storage
            .entries()
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["m1", "m2"]);
    }
}
