//! Durable key/value backends shared by every engine of an origin.

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{Result, SyncError};

const EVENT_CAPACITY: usize = 256;

// == Storage Event ==
/// Change notification emitted after every write or removal.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageEvent {
    pub key: String,
    /// None when the key was removed
    pub new_value: Option<String>,
}

// == Storage Backend ==
/// Synchronous string store with change notifications.
pub trait StorageBackend: Send + Sync + Debug {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
    /// Subscribes to changes made through any handle of this store.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

// == Memory Storage ==
/// In-memory store. Clones share the same data, like sibling contexts
/// sharing one origin's storage.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    items: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
    quota_bytes: Mutex<Option<usize>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                items: Mutex::new(HashMap::new()),
                events,
                quota_bytes: Mutex::new(None),
            }),
        }
    }

    /// Limits total stored bytes; writes beyond it fail like a full quota.
    pub fn set_quota(&self, quota_bytes: Option<usize>) {
        *self.inner.quota_bytes.lock() = quota_bytes;
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.items.lock().keys().cloned().collect()
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        // No subscribers is fine.
        let _ = self.inner.events.send(StorageEvent {
            key: key.to_string(),
            new_value,
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut items = self.inner.items.lock();
            if let Some(quota) = *self.inner.quota_bytes.lock() {
                let used: usize = items
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                if used + key.len() + value.len() > quota {
                    return Err(SyncError::Persistence(format!(
                        "quota of {} bytes exceeded writing '{}'",
                        quota, key
                    )));
                }
            }
            items.insert(key.to_string(), value.to_string());
        }
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let removed = self.inner.items.lock().remove(key).is_some();
        if removed {
            self.notify(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.inner.events.subscribe()
    }
}

// == File Storage ==
/// One file per key inside a directory. Notifications only reach
/// subscribers in the same process.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    events: broadcast::Sender<StorageEvent>,
}

impl FileStorage {
    /// Opens (and creates if needed) a storage directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            SyncError::Persistence(format!("cannot create {}: {}", dir.display(), e))
        })?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self { dir, events })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

impl StorageBackend for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::Persistence(format!("read '{}': {}", key, e))),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| SyncError::Persistence(format!("write '{}': {}", key, e)))?;
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            new_value: Some(value.to_string()),
        });
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {
                let _ = self.events.send(StorageEvent {
                    key: key.to_string(),
                    new_value: None,
                });
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Persistence(format!("remove '{}': {}", key, e))),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}
