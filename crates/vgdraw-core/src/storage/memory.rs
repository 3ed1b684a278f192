//! In-memory storage implementation.

use super::{Storage, StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory storage for tests and undo logs that need no persistence.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn write(&self, key: &str, contents: &str) -> StorageResult<()> {
        self.entries
            .write()
            .insert(key.to_string(), contents.to_string());
        Ok(())
    }

    fn read(&self, key: &str) -> StorageResult<String> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.read().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_write_read() {
        let storage = MemoryStorage::new();
        storage.write("a.vg", "{}").unwrap();
        assert_eq!(storage.read("a.vg").unwrap(), "{}");
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_memory_storage_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(storage.read("missing"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_memory_storage_delete_and_list() {
        let storage = MemoryStorage::new();
        storage.write("1.vg", "x").unwrap();
        storage.write("2.vg", "y").unwrap();
        storage.delete("1.vg").unwrap();
        storage.delete("never-written").unwrap();

        let keys = storage.list().unwrap();
        assert_eq!(keys, vec!["2.vg".to_string()]);
        assert!(!storage.exists("1.vg").unwrap());
    }
}
