//! In-memory key-value store.
//!
//! Not durable. Used by tests and by hosts that only need an ephemeral store.

use std::collections::HashMap;
use std::sync::Mutex;

use super::error::{StorageError, StorageResult};
use super::traits::KeyValueStore;

/// [`KeyValueStore`] backed by a `HashMap` keyed by `(namespace, key)`.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryKeyValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal mutex is poisoned.
    pub fn len(&self, namespace: &str) -> StorageResult<usize> {
        let guard = self.guard()?;
        Ok(guard.keys().filter(|(ns, _)| ns == namespace).count())
    }

    fn guard(
        &self,
    ) -> StorageResult<std::sync::MutexGuard<'_, HashMap<(String, String), String>>> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Persistence("mutex poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn read(&self, namespace: String, key: String) -> StorageResult<Option<String>> {
        Ok(self.guard()?.get(&(namespace, key)).cloned())
    }

    fn write(&self, namespace: String, key: String, value: String) -> StorageResult<()> {
        self.guard()?.insert((namespace, key), value);
        Ok(())
    }

    fn remove(&self, namespace: String, key: String) -> StorageResult<()> {
        self.guard()?.remove(&(namespace, key));
        Ok(())
    }
}
