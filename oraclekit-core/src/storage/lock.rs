//! Per-key locking for serialized record mutations.
//!
//! Writers of the same logical key are serialized so a read-modify-write of
//! one record never interleaves with another. Unrelated keys use different
//! locks and never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::error::{StorageError, StorageResult};

/// Hands out one mutex per logical key.
///
/// Entries are kept for the life of the manager. Callers lock a small, fixed
/// set of record names, so the table does not grow with use.
#[derive(Debug, Default)]
pub struct KeyLockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLockManager {
    /// Creates an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes the closure while holding the lock for `key`.
    ///
    /// The lock is released when the closure returns, whether it succeeds or
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock was poisoned or if the closure fails.
    pub fn with_key_lock<R, F>(&self, key: &str, f: F) -> StorageResult<R>
    where
        F: FnOnce() -> StorageResult<R>,
    {
        let lock = self.lock_for(key)?;
        let _guard = lock
            .lock()
            .map_err(|_| StorageError::Lock(format!("lock for `{key}` poisoned")))?;
        f()
    }

    /// Attempts to acquire the lock for `key` without blocking.
    ///
    /// Returns `Ok(None)` if another caller currently holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock was poisoned or if the closure fails.
    #[cfg(test)]
    pub(crate) fn try_with_key_lock<R, F>(&self, key: &str, f: F) -> StorageResult<Option<R>>
    where
        F: FnOnce() -> StorageResult<R>,
    {
        let lock = self.lock_for(key)?;
        let guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::WouldBlock) => return Ok(None),
            Err(std::sync::TryLockError::Poisoned(_)) => {
                return Err(StorageError::Lock(format!("lock for `{key}` poisoned")))
            }
        };
        let result = f();
        drop(guard);
        result.map(Some)
    }

    fn lock_for(&self, key: &str) -> StorageResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StorageError::Lock("lock table poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(key.to_string()).or_default()))
    }
}
