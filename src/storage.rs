//! Durable key-value storage for the preset collection
//!
//! The preset store treats blobs as opaque bytes. [`FileStore`] keeps one
//! file per key and replaces it atomically (write to a temp file, then
//! rename), so an interrupted write never leaves a half-written blob.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Storage collaborator used by the preset store
pub trait KeyValueStore {
    /// Ok(None) when the key has never been written
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn write_blob(&mut self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Directory-backed store, one `<key>.json` file per key
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            EngineError::persistence(format!(
                "Failed to create storage dir {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(EngineError::persistence(format!("Invalid storage key '{}'", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        fs::read(&path)
            .map(Some)
            .map_err(|e| EngineError::persistence(format!("Failed to read {}: {}", path.display(), e)))
    }

    fn write_blob(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");

        let write_tmp = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()
        };
        write_tmp().map_err(|e| {
            EngineError::persistence(format!("Failed to write {}: {}", tmp.display(), e))
        })?;

        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            EngineError::persistence(format!("Failed to replace {}: {}", path.display(), e))
        })
    }
}

#[derive(Default)]
struct MemoryInner {
    blobs: HashMap<String, Vec<u8>>,
    fail_writes: bool,
    writes: usize,
}

/// In-memory store. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `blobs`
    pub fn with_blobs<K: Into<String>>(blobs: impl IntoIterator<Item = (K, Vec<u8>)>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            for (k, v) in blobs {
                inner.blobs.insert(k.into(), v);
            }
        }
        store
    }

    /// Make every following write fail (simulates a full or read-only disk)
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().blobs.get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key))
    }

    fn write_blob(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(EngineError::persistence(format!("Write of '{}' refused", key)));
        }
        inner.blobs.insert(key.to_string(), bytes.to_vec());
        inner.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_roundtrip_and_replace() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path().join("presets")).unwrap();

        assert!(store.read_blob("savedPresets").unwrap().is_none());

        store.write_blob("savedPresets", b"[1]").unwrap();
        store.write_blob("savedPresets", b"[1,2]").unwrap();
        assert_eq!(store.read_blob("savedPresets").unwrap().unwrap(), b"[1,2]");

        // no temp file left behind
        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        assert!(store.write_blob("../escape", b"x").is_err());
        assert!(store.read_blob("").is_err());
    }

    #[test]
    fn test_memory_store_failure_injection() {
        let mut store = MemoryStore::new();
        store.write_blob("a", b"1").unwrap();

        store.set_fail_writes(true);
        assert!(matches!(
            store.write_blob("a", b"2"),
            Err(EngineError::PersistenceFailure(_))
        ));
        assert_eq!(store.get("a").unwrap(), b"1");
        assert_eq!(store.write_count(), 1);
    }
}
