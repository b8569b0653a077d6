//! Cancellation state storage.
//!
//! The store maps a [`ServiceKey`] to its [`CancellationRecord`]. It is
//! injected into the engine and controller; nothing in this crate reaches a
//! store through global state.

mod file;
mod memory;

use std::collections::BTreeMap;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;

use crate::error::StoreError;
use crate::models::{CancellationRecord, ServiceKey};

/// Snapshot of every stored record.
pub type Entries = BTreeMap<ServiceKey, CancellationRecord>;

/// Storage for cancellation records.
///
/// Implementations serialize all operations, so a `put` observes every
/// earlier write and is applied entirely or not at all.
pub trait CancellationStore: Send + Sync {
    /// Look up the record for a key.
    fn get(&self, key: &ServiceKey) -> Result<Option<CancellationRecord>, StoreError>;

    /// Store a record.
    ///
    /// Fails with [`StoreError::DuplicateRequest`] if the key already holds a
    /// record that is still live at `record.request_time`, and with
    /// [`StoreError::DuplicateRequestId`] if another live record uses the same
    /// request id. An expired record for the same key is replaced.
    fn put(&self, key: ServiceKey, record: CancellationRecord) -> Result<(), StoreError>;

    /// Remove the record for a key, returning it if present.
    fn remove(&self, key: &ServiceKey) -> Result<Option<CancellationRecord>, StoreError>;

    /// Snapshot of all records.
    fn all_entries(&self) -> Result<Entries, StoreError>;
}

/// Check that inserting `record` under `key` keeps the store consistent.
pub(crate) fn check_put(
    entries: &Entries,
    key: &ServiceKey,
    record: &CancellationRecord,
) -> Result<(), StoreError> {
    let at = record.request_time;

    if let Some(existing) = entries.get(key) {
        if existing.is_live(at) {
            return Err(StoreError::DuplicateRequest {
                key: key.clone(),
                request_id: existing.request_id.clone(),
            });
        }
    }

    if let Some((existing_key, _)) = entries
        .iter()
        .find(|(k, r)| *k != key && r.request_id == record.request_id && r.is_live(at))
    {
        return Err(StoreError::DuplicateRequestId {
            request_id: record.request_id.clone(),
            existing_key: existing_key.clone(),
        });
    }

    Ok(())
}
