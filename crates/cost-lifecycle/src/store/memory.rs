//! In-memory store for tests and ephemeral sessions.

use std::sync::RwLock;

use super::{check_put, CancellationStore, Entries};
use crate::error::StoreError;
use crate::models::{CancellationRecord, ServiceKey};

/// A thread-safe, non-durable cancellation store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<Entries>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding existing records without validation.
    ///
    /// Useful for seeding state that predates the current policy.
    #[must_use]
    pub fn from_entries(entries: Entries) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CancellationStore for InMemoryStore {
    fn get(&self, key: &ServiceKey) -> Result<Option<CancellationRecord>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: ServiceKey, record: CancellationRecord) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        check_put(&entries, &key, &record)?;
        entries.insert(key, record);
        Ok(())
    }

    fn remove(&self, key: &ServiceKey) -> Result<Option<CancellationRecord>, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.remove(key))
    }

    fn all_entries(&self) -> Result<Entries, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_put_get_remove() {
        let store = InMemoryStore::new();
        let key = ServiceKey::new("Amazon OpenSearch Service", Some("search-prod"));
        let now = Utc::now();
        let record = CancellationRecord::new(now, now + Duration::hours(24), "CAN-001").unwrap();

        store.put(key.clone(), record.clone()).unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(record.clone()));
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove(&key).unwrap(), Some(record));
        assert!(store.get(&key).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_put_leaves_prior_state() {
        let store = InMemoryStore::new();
        let key = ServiceKey::new("Amazon EC2", None);
        let now = Utc::now();
        let first = CancellationRecord::new(now, now + Duration::hours(24), "CAN-001").unwrap();
        let second = CancellationRecord::new(now, now + Duration::hours(24), "CAN-002").unwrap();

        store.put(key.clone(), first.clone()).unwrap();
        assert!(store.put(key.clone(), second).is_err());
        assert_eq!(store.get(&key).unwrap(), Some(first));
    }
}
