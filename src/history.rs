//! ==============================================================================
//! history.rs - bounded reading history and app settings
//! ==============================================================================
//!
//! purpose:
//!     keeps the ten most recent readings, newest first, as one json blob
//!     in the key-value store. every call reads or writes the whole list.
//!
//! resilience:
//!     a missing or corrupt blob reads as an empty history. write failures
//!     are returned to the caller.
//!
//! blocking:
//!     each public call is one run_blocking closure, so the whole
//!     read-modify-write of an append happens off the async workers.
//!
//! relationships:
//!     - uses: storage.rs (KeyValueStore)
//!     - used by: controller.rs (append on every successful poll, read for relay)
//!
//! ==============================================================================

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{HistoryEntry, Reading};
use crate::error::StorageError;
use crate::storage::{run_blocking, KeyValueStore};

pub const HISTORY_KEY: &str = "sensorHistory";
pub const SETTINGS_KEY: &str = "appSettings";
pub const HISTORY_CAPACITY: usize = 10;

#[derive(Clone)]
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    // read-modify-write must not interleave
    write_lock: Arc<Mutex<()>>,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// prepend a reading and truncate to capacity
    pub async fn append(&self, reading: Reading) -> Result<HistoryEntry, StorageError> {
        let this = self.clone();
        run_blocking(move || this.append_blocking(reading)).await
    }

    /// newest first
    pub async fn all(&self) -> Vec<HistoryEntry> {
        let this = self.clone();
        run_blocking(move || {
            let _guard = this.lock();
            Ok(this.load())
        })
        .await
        .unwrap_or_else(|e| {
            warn!("history read did not complete, treating as empty: {e}");
            Vec::new()
        })
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let this = self.clone();
        run_blocking(move || {
            let _guard = this.lock();
            this.store.remove(HISTORY_KEY)
        })
        .await
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn append_blocking(&self, reading: Reading) -> Result<HistoryEntry, StorageError> {
        let _guard = self.lock();

        let entry = HistoryEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            captured_date: reading
                .observed_at
                .with_timezone(&Local)
                .format("%Y-%m-%d")
                .to_string(),
            reading,
        };

        let mut entries = self.load();
        entries.insert(0, entry.clone());
        entries.truncate(HISTORY_CAPACITY);

        let bytes = serde_json::to_vec(&entries)?;
        self.store.set(HISTORY_KEY, &bytes)?;
        Ok(entry)
    }

    fn load(&self) -> Vec<HistoryEntry> {
        let bytes = match self.store.get(HISTORY_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("history unreadable, treating as empty: {e}");
                return Vec::new();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("history corrupt, treating as empty: {e}");
                Vec::new()
            }
        }
    }
}

// ==============================================================================
// settings
// ==============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub last_address: Option<String>,
}

/// small json blob next to the history; currently just the last used address
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Settings {
        let store = self.store.clone();
        match run_blocking(move || store.get(SETTINGS_KEY)).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("settings corrupt, using defaults: {e}");
                Settings::default()
            }),
            Ok(None) => Settings::default(),
            Err(e) => {
                warn!("settings unreadable, using defaults: {e}");
                Settings::default()
            }
        }
    }

    pub async fn save(&self, settings: &Settings) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(settings)?;
        let store = self.store.clone();
        run_blocking(move || store.set(SETTINGS_KEY, &bytes)).await
    }
}
