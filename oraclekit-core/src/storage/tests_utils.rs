//! Test helpers for secure storage.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};

use super::{error::StorageError, traits::DeviceKeystore, KeyValueStore, NONCE_LEN};

pub struct InMemoryKeystore {
    key: [u8; 32],
}

impl InMemoryKeystore {
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }
}

impl Default for InMemoryKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceKeystore for InMemoryKeystore {
    fn seal(
        &self,
        associated_data: Vec<u8>,
        plaintext: Vec<u8>,
    ) -> Result<Vec<u8>, StorageError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|err| StorageError::Keystore(err.to_string()))?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: &associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        let mut out = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open_sealed(
        &self,
        associated_data: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> Result<Vec<u8>, StorageError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(StorageError::Crypto(
                "keystore ciphertext too short".to_string(),
            ));
        }
        let (nonce_bytes, payload) = ciphertext.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|err| StorageError::Keystore(err.to_string()))?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: payload,
                    aad: &associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))
    }
}

/// Keystore whose backing service is never reachable.
pub struct UnavailableKeystore;

impl DeviceKeystore for UnavailableKeystore {
    fn seal(&self, _: Vec<u8>, _: Vec<u8>) -> Result<Vec<u8>, StorageError> {
        Err(StorageError::Keystore("keystore offline".to_string()))
    }

    fn open_sealed(&self, _: Vec<u8>, _: Vec<u8>) -> Result<Vec<u8>, StorageError> {
        Err(StorageError::Keystore("keystore offline".to_string()))
    }
}

/// Key-value store that rejects every write.
pub struct ReadOnlyKeyValueStore;

impl KeyValueStore for ReadOnlyKeyValueStore {
    fn read(&self, _: String, _: String) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    fn write(&self, _: String, _: String, _: String) -> Result<(), StorageError> {
        Err(StorageError::Persistence("read-only".to_string()))
    }

    fn remove(&self, _: String, _: String) -> Result<(), StorageError> {
        Err(StorageError::Persistence("read-only".to_string()))
    }
}

/// In-memory store whose secure-namespace writes start failing once
/// `allowed` of them have succeeded.
pub struct FailingSecureWrites {
    inner: super::MemoryKeyValueStore,
    allowed: std::sync::atomic::AtomicUsize,
    armed: std::sync::atomic::AtomicBool,
}

impl FailingSecureWrites {
    pub fn new() -> Self {
        Self {
            inner: super::MemoryKeyValueStore::new(),
            allowed: std::sync::atomic::AtomicUsize::new(0),
            armed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Lets `allowed` more secure writes through, then fails the rest.
    pub fn fail_after(&self, allowed: usize) {
        self.allowed
            .store(allowed, std::sync::atomic::Ordering::SeqCst);
        self.armed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

impl KeyValueStore for FailingSecureWrites {
    fn read(&self, namespace: String, key: String) -> Result<Option<String>, StorageError> {
        self.inner.read(namespace, key)
    }

    fn write(&self, namespace: String, key: String, value: String) -> Result<(), StorageError> {
        use std::sync::atomic::Ordering;

        if namespace == super::SECURE_NAMESPACE && self.armed.load(Ordering::SeqCst) {
            let passed = self
                .allowed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !passed {
                return Err(StorageError::Persistence("disk full".to_string()));
            }
        }
        self.inner.write(namespace, key, value)
    }

    fn remove(&self, namespace: String, key: String) -> Result<(), StorageError> {
        self.inner.remove(namespace, key)
    }
}
