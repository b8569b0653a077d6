//! JSON file store.
//!
//! The durable slot is a single JSON object mapping `"<name>|<id>"` to
//! `{requestTime, etaTime, requestId}`. Older dashboards wrote
//! `{cancelledOn}` instead; those entries are normalized on load.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{check_put, CancellationStore, Entries};
use crate::error::{PersistenceCorruptError, StoreError};
use crate::models::{CancellationRecord, RequestId, ServiceKey, LEGACY_REQUEST_PREFIX};

/// Legacy entry shape written before ETAs were tracked.
#[derive(Debug, Deserialize)]
struct LegacyEntry {
    #[serde(rename = "cancelledOn")]
    cancelled_on: String,
}

/// File-backed cancellation store.
#[derive(Debug)]
pub struct JsonFileStore {
    /// Path to the state file
    path: PathBuf,

    entries: RwLock<Entries>,

    /// Set when the file existed but could not be fully read
    load_warning: Option<PersistenceCorruptError>,
}

impl JsonFileStore {
    /// Open the store at `path`.
    ///
    /// Never fails: a missing file is an empty store, and an unreadable or
    /// malformed file is reported through [`Self::load_warning`] and treated
    /// as empty. `legacy_horizon` sets the ETA of entries migrated from the
    /// legacy layout.
    pub fn open(path: impl AsRef<Path>, legacy_horizon: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        let (entries, load_warning) = match std::fs::read_to_string(&path) {
            Ok(content) => Self::decode(&path, &content, legacy_horizon),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cancellation state yet");
                (Entries::new(), None)
            }
            Err(e) => (
                Entries::new(),
                Some(PersistenceCorruptError {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }),
            ),
        };

        if let Some(warning) = &load_warning {
            warn!(error = %warning, "Recovered cancellation state with data loss");
        } else {
            info!(path = %path.display(), records = entries.len(), "Loaded cancellation state");
        }

        Self {
            path,
            entries: RwLock::new(entries),
            load_warning,
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The problem encountered while loading, if any.
    #[must_use]
    pub fn load_warning(&self) -> Option<&PersistenceCorruptError> {
        self.load_warning.as_ref()
    }

    /// Parse a payload, keeping every entry that can be understood.
    fn decode(
        path: &Path,
        content: &str,
        legacy_horizon: Duration,
    ) -> (Entries, Option<PersistenceCorruptError>) {
        let corrupt = |reason: String| PersistenceCorruptError {
            path: path.display().to_string(),
            reason,
        };

        if content.trim().is_empty() {
            return (Entries::new(), None);
        }

        let object = match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(object)) => object,
            Ok(_) => return (Entries::new(), Some(corrupt("expected a JSON object".into()))),
            Err(e) => return (Entries::new(), Some(corrupt(e.to_string()))),
        };

        let mut entries = Entries::new();
        let mut skipped = Vec::new();

        for (encoded, value) in object {
            let key = ServiceKey::decode(&encoded);
            match Self::decode_entry(&encoded, value, legacy_horizon) {
                Some(record) => {
                    if let Some(previous) = entries.insert(key.clone(), record) {
                        // Two encodings of one key; keep the first seen.
                        warn!(key = %encoded, service = %key, "Duplicate cancellation entry");
                        entries.insert(key, previous);
                        skipped.push(encoded);
                    }
                }
                None => {
                    warn!(key = %encoded, "Skipping unreadable cancellation entry");
                    skipped.push(encoded);
                }
            }
        }

        let warning = (!skipped.is_empty())
            .then(|| corrupt(format!("skipped unreadable entries: {}", skipped.join(", "))));
        (entries, warning)
    }

    fn decode_entry(
        encoded: &str,
        value: Value,
        legacy_horizon: Duration,
    ) -> Option<CancellationRecord> {
        if let Ok(record) = serde_json::from_value::<CancellationRecord>(value.clone()) {
            return (record.eta_time > record.request_time).then_some(record);
        }

        let legacy: LegacyEntry = serde_json::from_value(value).ok()?;
        let request_time = parse_legacy_time(&legacy.cancelled_on)?;
        debug!(key = %encoded, "Normalizing legacy cancellation entry");
        let Some(eta_time) = request_time.checked_add_signed(legacy_horizon) else {
            warn!(key = %encoded, horizon = %legacy_horizon, "Legacy entry ETA is out of range");
            return None;
        };
        CancellationRecord::new(
            request_time,
            eta_time,
            RequestId::new(format!("{LEGACY_REQUEST_PREFIX}{encoded}")),
        )
    }

    /// Atomically replace the state file with `entries`.
    fn persist(&self, entries: &Entries) -> Result<(), StoreError> {
        let io_error = |e: std::io::Error| StoreError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        };

        let payload: BTreeMap<String, &CancellationRecord> =
            entries.iter().map(|(k, r)| (k.encode(), r)).collect();
        let content = serde_json::to_string_pretty(&payload)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_error)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_error)?;
        tmp.write_all(content.as_bytes()).map_err(io_error)?;
        tmp.as_file().sync_all().map_err(io_error)?;
        tmp.persist(&self.path).map_err(|e| io_error(e.error))?;

        debug!(path = %self.path.display(), records = entries.len(), "Persisted cancellation state");
        Ok(())
    }
}

/// Parse a legacy `cancelledOn` value: RFC3339 or a bare `YYYY-MM-DD` date.
fn parse_legacy_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

impl CancellationStore for JsonFileStore {
    fn get(&self, key: &ServiceKey) -> Result<Option<CancellationRecord>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: ServiceKey, record: CancellationRecord) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        check_put(&entries, &key, &record)?;

        let mut next = entries.clone();
        next.insert(key, record);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &ServiceKey) -> Result<Option<CancellationRecord>, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        if !entries.contains_key(key) {
            return Ok(None);
        }

        let mut next = entries.clone();
        let removed = next.remove(key);
        self.persist(&next)?;
        *entries = next;
        Ok(removed)
    }

    fn all_entries(&self) -> Result<Entries, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.clone())
    }
}
