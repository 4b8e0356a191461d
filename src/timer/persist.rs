//! Write-through persistence of the timer registry.
//!
//! The durable form is one record per process identity holding a mapping
//! `timer id -> [text, remaining_secs, scope, paused]`. Every mutation
//! rewrites the whole record; with a handful of timers per scope that is
//! cheap enough to do synchronously.

use crate::error::{Result, TimerError};
use crate::timer::ScopeId;
use crate::timer::registry::TimerRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

/// Persisted shape of one timer: `(text, remaining_secs, scope, paused)`.
pub type PersistedTimer = (String, u64, ScopeId, bool);

/// Persisted mapping keyed by timer id.
pub type PersistedTimers = BTreeMap<String, PersistedTimer>;

/// Durable key/value storage for snapshot records.
pub trait SnapshotStore: Send + Sync {
    /// Read the record stored under `key`. A missing key is `Ok(None)`.
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Replace the record stored under `key`.
    fn save(&self, key: &str, value: &serde_json::Value) -> Result<()>;
}

/// On-disk layout of [`JsonFileStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    /// Schema version.
    #[serde(default = "default_store_version")]
    version: u8,
    /// Last write time.
    #[serde(default)]
    saved_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Records keyed by process identity.
    #[serde(default)]
    records: BTreeMap<String, serde_json::Value>,
}

fn default_store_version() -> u8 {
    1
}

/// Snapshot store backed by a single pretty-printed JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<StoreFile> {
        let bytes = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreFile::default());
            }
            Err(e) => {
                return Err(TimerError::Persistence(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            TimerError::Persistence(format!("cannot parse {}: {e}", self.path.display()))
        })
    }

    fn write_file(&self, file: &StoreFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TimerError::Persistence(format!("cannot create state dir: {e}"))
            })?;
        }

        let json = serde_json::to_string_pretty(file)
            .map_err(|e| TimerError::Persistence(format!("cannot serialize state: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| TimerError::Persistence(format!("cannot write state: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| TimerError::Persistence(format!("cannot replace state: {e}")))?;
        Ok(())
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let _io = self.io_lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_file()?.records.remove(key))
    }

    fn save(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let _io = self.io_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = match self.read_file() {
            Ok(file) => file,
            Err(e) => {
                warn!("replacing unreadable timer state: {e}");
                StoreFile::default()
            }
        };
        file.version = default_store_version();
        file.saved_at = Some(chrono::Utc::now());
        file.records.insert(key.to_owned(), value.clone());
        self.write_file(&file)
    }
}

/// Volatile snapshot store. Survives a simulated restart as long as the
/// same instance is shared.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw record, bypassing the snapshotter.
    pub fn insert_raw(&self, key: &str, value: serde_json::Value) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_owned(), value);
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn save(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.insert_raw(key, value.clone());
        Ok(())
    }
}

/// A timer decoded from the snapshot during startup recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredTimer {
    /// Id the timer had in the previous process.
    pub previous_id: String,
    pub text: String,
    pub remaining: u64,
    pub scope: ScopeId,
    pub paused: bool,
}

/// Serializes the registry into a [`SnapshotStore`] record.
pub struct Snapshotter {
    store: Arc<dyn SnapshotStore>,
    key: String,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Snapshotter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshotter")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Snapshotter {
    /// Create a snapshotter writing under the process identity `key`.
    pub fn new(store: Arc<dyn SnapshotStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Build the persisted mapping for every timer with time left.
    #[must_use]
    pub fn capture(registry: &TimerRegistry) -> PersistedTimers {
        registry
            .all_entries()
            .iter()
            .filter_map(|entry| {
                let state = entry.state();
                (state.remaining > 0 && !entry.is_cancelled()).then(|| {
                    (
                        entry.id().to_string(),
                        (
                            entry.text().to_owned(),
                            state.remaining,
                            entry.scope(),
                            state.paused,
                        ),
                    )
                })
            })
            .collect()
    }

    /// Write the registry through to the store. Failures are logged, never
    /// propagated: a lost snapshot must not take a running timer down.
    pub fn persist(&self, registry: &TimerRegistry) {
        if let Err(e) = self.try_persist(registry) {
            error!("cannot persist timer state: {e}");
        }
    }

    /// Write the registry through to the store.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the record cannot be written.
    pub fn try_persist(&self, registry: &TimerRegistry) -> Result<()> {
        // Capture inside the lock so the last write always carries the newest state.
        let _write = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let timers = Self::capture(registry);
        let value = serde_json::to_value(&timers)
            .map_err(|e| TimerError::Persistence(format!("cannot encode snapshot: {e}")))?;
        self.store.save(&self.key, &value)?;
        debug!(timers = timers.len(), "timer snapshot written");
        Ok(())
    }

    /// Read the stored record, skipping (and logging) every malformed or
    /// expired entry. An absent record is an empty set.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the record itself cannot be read.
    pub fn load(&self) -> Result<Vec<RecoveredTimer>> {
        match self.store.load(&self.key)? {
            Some(value) => Ok(decode_record(&value)),
            None => Ok(Vec::new()),
        }
    }

    /// Raw persisted mapping, for inspection.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the record cannot be read.
    pub fn load_raw(&self) -> Result<Option<serde_json::Value>> {
        self.store.load(&self.key)
    }
}

/// Decode a persisted mapping entry by entry.
#[must_use]
pub fn decode_record(value: &serde_json::Value) -> Vec<RecoveredTimer> {
    let Some(map) = value.as_object() else {
        warn!("ignoring timer snapshot: expected an object, found {value}");
        return Vec::new();
    };

    let mut recovered = Vec::with_capacity(map.len());
    for (key, raw) in map {
        match serde_json::from_value::<(String, i64, ScopeId, bool)>(raw.clone()) {
            Ok((text, remaining, scope, paused)) => {
                let Ok(remaining) = u64::try_from(remaining) else {
                    debug!(timer_id = %key, "dropping expired timer from snapshot");
                    continue;
                };
                if remaining == 0 {
                    debug!(timer_id = %key, "dropping expired timer from snapshot");
                    continue;
                }
                recovered.push(RecoveredTimer {
                    previous_id: key.clone(),
                    text,
                    remaining,
                    scope,
                    paused,
                });
            }
            Err(e) => {
                warn!(timer_id = %key, "skipping malformed saved timer: {e}");
            }
        }
    }
    recovered
}
