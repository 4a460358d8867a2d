//! Persisted key-value store.
//!
//! The crash-loop guard and the presenter share a tiny amount of state across
//! process launches: the last crash timestamp and the configured recipient
//! list. [`KeyValueStore`] is the seam; [`FileStore`] is the durable
//! implementation and [`MemoryStore`] backs tests and hosts that bring their
//! own persistence.
//!
//! # File layout
//!
//! ```text
//! <storage_dir>/crashguard_preferences.json
//! {
//!   "last_crash_timestamp": 1700000000000,
//!   "mails": "[\"ops@example.com\"]"
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::error::StoreError;

/// Key holding the last crash timestamp (epoch milliseconds).
pub const KEY_LAST_CRASH: &str = "last_crash_timestamp";

/// Key holding the JSON-encoded recipient list.
pub const KEY_MAILS: &str = "mails";

/// File name of the durable store inside the storage directory.
pub const STORE_FILE_NAME: &str = "crashguard_preferences.json";

/// Simple typed key-value store.
///
/// Every `put_*` must be a synchronous commit: when it returns `Ok`, the value
/// survives an immediate process kill.
pub trait KeyValueStore: Send + Sync {
    /// Read an integer value.
    fn get_i64(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Read a string value.
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Durably write an integer value.
    fn put_i64(&self, key: &str, value: i64) -> Result<(), StoreError>;

    /// Durably write a string value.
    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Persist the recipient list as a JSON array string under [`KEY_MAILS`].
pub fn save_recipients(store: &dyn KeyValueStore, emails: &[String]) -> Result<(), StoreError> {
    let json = serde_json::to_string(emails)?;
    store.put_string(KEY_MAILS, &json)
}

/// Load the recipient list. A missing key yields an empty list.
pub fn load_recipients(store: &dyn KeyValueStore) -> Result<Vec<String>, StoreError> {
    match store.get_string(KEY_MAILS)? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

fn expect_i64(key: &str, value: &Value) -> Result<i64, StoreError> {
    value.as_i64().ok_or_else(|| StoreError::WrongType {
        key: key.to_string(),
        expected: "integer",
    })
}

fn expect_string(key: &str, value: &Value) -> Result<String, StoreError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| StoreError::WrongType {
            key: key.to_string(),
            expected: "string",
        })
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// Durable store backed by a single JSON document.
///
/// Writes go to a sibling temp file which is `fsync`ed and renamed over the
/// original, so a reader never observes a half-written document.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (lazily) the store inside `storage_dir`.
    ///
    /// Nothing touches the disk until the first read or write.
    #[must_use]
    pub fn new(storage_dir: &Path) -> Self {
        Self::at_path(storage_dir.join(STORE_FILE_NAME))
    }

    /// Use an explicit file path for the store document.
    #[must_use]
    pub fn at_path(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, StoreError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&data)?)
    }

    fn commit(&self, doc: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(doc)?;
        let tmp_path = self.path.with_extension("json.tmp");
        write_file_sync(&tmp_path, &json)?;
        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path);
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut Map<String, Value>)) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        // An unparseable document is replaced on the next commit.
        let mut doc = match self.load() {
            Err(StoreError::Serde(e)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Store document is corrupt; overwriting"
                );
                Map::new()
            }
            other => other?,
        };
        f(&mut doc);
        self.commit(&doc)
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(key))
    }
}

impl KeyValueStore for FileStore {
    fn get_i64(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.read(key)?.map(|v| expect_i64(key, &v)).transpose()
    }

    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(key)?.map(|v| expect_string(key, &v)).transpose()
    }

    fn put_i64(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.insert(key.to_string(), Value::from(value));
        })?;
        tracing::debug!(path = %self.path.display(), key, value, "Committed store value");
        Ok(())
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.insert(key.to_string(), Value::from(value));
        })?;
        tracing::debug!(path = %self.path.display(), key, "Committed store value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.remove(key);
        })
    }
}

pub(crate) fn write_file_sync(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut f = fs::File::create(path)?;
    f.write_all(data)?;
    f.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = f.set_permissions(fs::Permissions::from_mode(0o600));
    }

    Ok(())
}

#[cfg(unix)]
pub(crate) fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn sync_parent_dir(_path: &Path) {}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

/// Non-durable in-process store.
///
/// Counts successful writes and can be switched into a failing mode, which
/// makes it the store of choice for exercising the fault path in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put_*`/`remove` calls so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent read fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".to_string()));
        }
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn write(&self, f: impl FnOnce(&mut HashMap<String, Value>)) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut values);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get_i64(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.read(key)?.map(|v| expect_i64(key, &v)).transpose()
    }

    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(key)?.map(|v| expect_string(key, &v)).transpose()
    }

    fn put_i64(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.write(|values| {
            values.insert(key.to_string(), Value::from(value));
        })
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write(|values| {
            values.insert(key.to_string(), Value::from(value));
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.write(|values| {
            values.remove(key);
        })
    }
}
