//! Authenticated-encryption facade over the platform key-value store.

use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use zeroize::Zeroizing;

use super::error::{StorageError, StorageResult};
use super::keys::MasterKey;
use super::lock::KeyLockManager;
use super::records::SecretRecord;
use super::traits::{DeviceKeystore, KeyValueStore};
use super::{RAW_NAMESPACE, SECRET_RECORD_AD, SECURE_NAMESPACE};

/// Encrypted key-value store.
///
/// Secrets live in the secure namespace, sealed with AES-256-GCM under the
/// store's [`MasterKey`] with a fresh nonce per write and the logical key as
/// associated data. Non-sensitive values go through the `*_raw` methods into a
/// separate namespace of the same backing store, so the same logical key can
/// exist in both without colliding.
pub struct SecureStore {
    kv: Arc<dyn KeyValueStore>,
    keystore: Arc<dyn DeviceKeystore>,
    master: RwLock<MasterKey>,
    locks: KeyLockManager,
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore").finish_non_exhaustive()
    }
}

impl SecureStore {
    /// Opens the store, loading or creating its master key.
    ///
    /// # Errors
    ///
    /// Returns an error if the keystore or the persistence layer is unavailable,
    /// or if the stored master key envelope is malformed.
    pub fn open(
        kv: Arc<dyn KeyValueStore>,
        keystore: Arc<dyn DeviceKeystore>,
    ) -> StorageResult<Self> {
        let master = MasterKey::load_or_create(keystore.as_ref(), kv.as_ref(), now_secs())?;
        log::debug!("secure store opened with master key {master:?}");
        Ok(Self {
            kv,
            keystore,
            master: RwLock::new(master),
            locks: KeyLockManager::new(),
        })
    }

    /// Seals `plaintext` and stores it under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing fails or the write is rejected.
    pub fn put(&self, key: &str, plaintext: &[u8]) -> StorageResult<()> {
        self.locks.with_key_lock(key, || {
            let master = self.master()?;
            let (nonce, ciphertext) = master.seal(&associated_data(key), plaintext)?;
            let record = SecretRecord::new(master.key_id(), nonce, ciphertext);
            self.kv.write(
                SECURE_NAMESPACE.to_string(),
                key.to_string(),
                record.encode()?,
            )
        })
    }

    /// Reads and opens the secret stored under `key`.
    ///
    /// Returns `Ok(None)` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DecryptionFailed`] if a record is present but
    /// malformed, tampered with, or sealed under a different master key, and a
    /// persistence error if it cannot be read.
    pub fn get(&self, key: &str) -> StorageResult<Option<Zeroizing<Vec<u8>>>> {
        self.locks.with_key_lock(key, || {
            let Some(encoded) = self
                .kv
                .read(SECURE_NAMESPACE.to_string(), key.to_string())?
            else {
                return Ok(None);
            };
            let failed = |reason: String| StorageError::DecryptionFailed {
                key: key.to_string(),
                reason,
            };

            let record = SecretRecord::decode(&encoded).map_err(|err| failed(err.to_string()))?;
            let master = self.master()?;
            if record.key_id() != master.key_id().as_slice() {
                return Err(failed("sealed under a different master key".to_string()));
            }
            let nonce = record.nonce().map_err(|err| failed(err.to_string()))?;
            master
                .open(&associated_data(key), &nonce, record.ciphertext())?
                .map(|plaintext| Some(Zeroizing::new(plaintext)))
                .ok_or_else(|| failed("authentication tag mismatch".to_string()))
        })
    }

    /// Returns `true` if a secret record exists under `key`, without opening it.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer cannot be read.
    pub fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self
            .kv
            .read(SECURE_NAMESPACE.to_string(), key.to_string())?
            .is_some())
    }

    /// Removes the secret stored under `key`. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error only for persistence failures.
    pub fn delete(&self, key: &str) -> StorageResult<()> {
        self.locks.with_key_lock(key, || {
            self.kv
                .remove(SECURE_NAMESPACE.to_string(), key.to_string())
        })
    }

    /// Stores a non-sensitive value without encryption.
    ///
    /// # Errors
    ///
    /// Returns an error if the write is rejected.
    pub fn set_raw(&self, key: &str, value: &str) -> StorageResult<()> {
        self.kv
            .write(RAW_NAMESPACE.to_string(), key.to_string(), value.to_string())
    }

    /// Reads a value written with [`SecureStore::set_raw`].
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer cannot be read.
    pub fn get_raw(&self, key: &str) -> StorageResult<Option<String>> {
        self.kv.read(RAW_NAMESPACE.to_string(), key.to_string())
    }

    /// Removes a value written with [`SecureStore::set_raw`].
    ///
    /// # Errors
    ///
    /// Returns an error only for persistence failures.
    pub fn remove_raw(&self, key: &str) -> StorageResult<()> {
        self.kv.remove(RAW_NAMESPACE.to_string(), key.to_string())
    }

    /// Replaces the master key with a freshly generated one.
    ///
    /// Every record sealed before the rotation becomes unreadable and reports
    /// [`StorageError::DecryptionFailed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the new key cannot be sealed or persisted; the old
    /// key stays active in that case.
    pub fn rotate_master_key(&self) -> StorageResult<()> {
        let mut master = self
            .master
            .write()
            .map_err(|_| StorageError::Lock("master key lock poisoned".to_string()))?;
        *master = MasterKey::create(self.keystore.as_ref(), self.kv.as_ref(), now_secs())?;
        log::warn!("master key rotated, previously stored secrets are no longer readable");
        Ok(())
    }

    fn master(&self) -> StorageResult<RwLockReadGuard<'_, MasterKey>> {
        self.master
            .read()
            .map_err(|_| StorageError::Lock("master key lock poisoned".to_string()))
    }
}

fn associated_data(key: &str) -> Vec<u8> {
    let mut ad = Vec::with_capacity(SECRET_RECORD_AD.len() + key.len());
    ad.extend_from_slice(SECRET_RECORD_AD);
    ad.extend_from_slice(key.as_bytes());
    ad
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
