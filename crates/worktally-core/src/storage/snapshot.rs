//! Same-device key/value snapshot store.
//!
//! Synchronous and cheap, written on every tick. Not guaranteed durable:
//! the user may wipe it at any time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SnapshotError;

pub trait SnapshotStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, blob: &str) -> Result<(), SnapshotError>;
    fn remove(&self, key: &str) -> Result<(), SnapshotError>;
}

impl<T: SnapshotStore + ?Sized> SnapshotStore for Rc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
    fn set(&self, key: &str, blob: &str) -> Result<(), SnapshotError> {
        (**self).set(key, blob)
    }
    fn remove(&self, key: &str) -> Result<(), SnapshotError> {
        (**self).remove(key)
    }
}

#[derive(Debug, Default)]
struct MemorySnapshotInner {
    entries: HashMap<String, String>,
    writes: usize,
}

/// In-memory [`SnapshotStore`]; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    inner: Arc<Mutex<MemorySnapshotInner>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemorySnapshotInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().entries.get(key).cloned()
    }

    fn set(&self, key: &str, blob: &str) -> Result<(), SnapshotError> {
        let mut inner = self.lock();
        inner.writes += 1;
        inner.entries.insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SnapshotError> {
        self.lock().entries.remove(key);
        Ok(())
    }
}

/// JSON file holding every key. Written through a temp file and renamed so
/// a crash mid-write leaves the previous contents intact.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/snapshot.json`.
    pub fn open_default() -> Result<Self, crate::error::ConfigError> {
        Ok(Self::new(super::data_dir()?.join("snapshot.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> SnapshotError {
        SnapshotError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// An unreadable or unparsable file reads as empty.
    fn read_all(&self) -> HashMap<String, String> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let data = serde_json::to_string_pretty(entries).map_err(|e| SnapshotError::Corrupted {
            key: "*".into(),
            message: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn get(&self, key: &str) -> Option<String> {
        self.read_all().remove(key)
    }

    fn set(&self, key: &str, blob: &str) -> Result<(), SnapshotError> {
        let mut entries = self.read_all();
        entries.insert(key.to_string(), blob.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), SnapshotError> {
        let mut entries = self.read_all();
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}
