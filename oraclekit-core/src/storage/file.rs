//! File-backed key-value store.
//!
//! Each namespace is one JSON document under the root directory. Writes use
//! the write-to-temp-then-rename pattern:
//! 1. Write the updated document to `{namespace}.json.tmp`
//! 2. `fsync` the temporary file
//! 3. Atomically rename it over `{namespace}.json`
//!
//! so a crash leaves either the complete old document or the complete new one.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::{StorageError, StorageResult};
use super::lock::KeyLockManager;
use super::traits::KeyValueStore;

/// [`KeyValueStore`] persisting one JSON file per namespace.
#[derive(Debug)]
pub struct FileKeyValueStore {
    root: PathBuf,
    locks: KeyLockManager,
}

impl FileKeyValueStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|err| map_io_err("create root", &err))?;
        Ok(Self {
            root,
            locks: KeyLockManager::new(),
        })
    }

    /// Returns the storage root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_path(&self, namespace: &str) -> StorageResult<PathBuf> {
        let valid = !namespace.is_empty()
            && namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            && !namespace.starts_with('.');
        if !valid {
            return Err(StorageError::Persistence(format!(
                "invalid namespace `{namespace}`"
            )));
        }
        Ok(self.root.join(format!("{namespace}.json")))
    }

    fn load(path: &Path) -> StorageResult<BTreeMap<String, String>> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| StorageError::Serialization(err.to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(map_io_err("read", &err)),
        }
    }

    fn store(path: &Path, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path).map_err(|err| map_io_err("create", &err))?;
            file.write_all(&bytes)
                .map_err(|err| map_io_err("write", &err))?;
            file.sync_all().map_err(|err| map_io_err("sync", &err))?;
        }
        fs::rename(&tmp_path, path).map_err(|err| map_io_err("rename", &err))
    }

    fn update<F>(&self, namespace: &str, f: F) -> StorageResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let path = self.namespace_path(namespace)?;
        self.locks.with_key_lock(namespace, || {
            let mut entries = Self::load(&path)?;
            if f(&mut entries) {
                Self::store(&path, &entries)?;
            }
            Ok(())
        })
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn read(&self, namespace: String, key: String) -> StorageResult<Option<String>> {
        let path = self.namespace_path(&namespace)?;
        self.locks
            .with_key_lock(&namespace, || Ok(Self::load(&path)?.remove(&key)))
    }

    fn write(&self, namespace: String, key: String, value: String) -> StorageResult<()> {
        self.update(&namespace, |entries| {
            entries.insert(key, value);
            true
        })
    }

    fn remove(&self, namespace: String, key: String) -> StorageResult<()> {
        self.update(&namespace, |entries| entries.remove(&key).is_some())
    }
}

fn map_io_err(context: &str, err: &std::io::Error) -> StorageError {
    StorageError::Persistence(format!("{context}: {err}"))
}
