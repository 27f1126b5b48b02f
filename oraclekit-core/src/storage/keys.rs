//! Master key lifecycle and the AEAD primitives built on it.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    envelope::MasterKeyEnvelope,
    error::{StorageError, StorageResult},
    traits::{DeviceKeystore, KeyValueStore},
    MASTER_KEY_ENTRY, MASTER_KEY_ENVELOPE_AD, META_NAMESPACE,
};

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

const KEY_ID_LEN: usize = 16;

/// The symmetric key protecting every secret record of a store.
///
/// Held in memory for the lifetime of the store and zeroized on drop. It only
/// ever reaches persistence wrapped by the [`DeviceKeystore`].
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; 32],
    key_id: [u8; KEY_ID_LEN],
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("key", &"[REDACTED]")
            .field("key_id", &hex::encode(self.key_id))
            .finish()
    }
}

impl MasterKey {
    /// Opens the persisted master key, or creates and persists one on first use.
    ///
    /// If an envelope exists but the device keystore can no longer open it
    /// (the device key was reset), a fresh master key replaces it. Records
    /// sealed under the previous key then fail with
    /// [`StorageError::DecryptionFailed`] instead of decrypting to garbage.
    ///
    /// # Errors
    ///
    /// Returns an error if the keystore or the persistence layer is unavailable,
    /// or if the stored envelope is malformed.
    pub fn load_or_create(
        keystore: &dyn DeviceKeystore,
        kv: &dyn KeyValueStore,
        now: u64,
    ) -> StorageResult<Self> {
        let Some(encoded) = kv.read(META_NAMESPACE.to_string(), MASTER_KEY_ENTRY.to_string())?
        else {
            log::info!("no master key envelope found, generating a new master key");
            return Self::create(keystore, kv, now);
        };

        let envelope = MasterKeyEnvelope::decode(&encoded)?;
        let key_id = parse_array::<KEY_ID_LEN>(&envelope.key_id, "key id")?;
        match keystore.open_sealed(MASTER_KEY_ENVELOPE_AD.to_vec(), envelope.wrapped_key) {
            Ok(mut bytes) => {
                let key = parse_array::<32>(&bytes, "master key");
                bytes.zeroize();
                Ok(Self { key: key?, key_id })
            }
            Err(StorageError::Crypto(reason)) => {
                log::warn!(
                    "device key no longer opens the master key envelope ({reason}); \
                     regenerating, existing secrets become unreadable"
                );
                Self::create(keystore, kv, now)
            }
            Err(err) => Err(err),
        }
    }

    /// Generates a new master key, wraps it and persists the envelope,
    /// replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing or persisting the envelope fails.
    pub fn create(
        keystore: &dyn DeviceKeystore,
        kv: &dyn KeyValueStore,
        now: u64,
    ) -> StorageResult<Self> {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        let mut key_id = [0u8; KEY_ID_LEN];
        OsRng.fill_bytes(&mut key_id);
        let master = Self { key, key_id };
        key.zeroize();

        let wrapped = keystore.seal(MASTER_KEY_ENVELOPE_AD.to_vec(), master.key.to_vec())?;
        let envelope = MasterKeyEnvelope::new(key_id.to_vec(), wrapped, now);
        kv.write(
            META_NAMESPACE.to_string(),
            MASTER_KEY_ENTRY.to_string(),
            envelope.encode()?,
        )?;
        Ok(master)
    }

    /// Identifier of this key, stored alongside every record it seals.
    #[must_use]
    pub const fn key_id(&self) -> &[u8; KEY_ID_LEN] {
        &self.key_id
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    ///
    /// Returns `(nonce, ciphertext || tag)`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Crypto`] if the cipher rejects the input.
    pub fn seal(
        &self,
        associated_data: &[u8],
        plaintext: &[u8],
    ) -> StorageResult<([u8; NONCE_LEN], Vec<u8>)> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| StorageError::Crypto("AES-256-GCM encryption failed".to_string()))?;
        Ok((nonce, ciphertext))
    }

    /// Decrypts and authenticates `ciphertext`.
    ///
    /// Returns `None` when authentication fails; the caller decides how to
    /// report it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Crypto`] if the cipher cannot be constructed.
    pub fn open(
        &self,
        associated_data: &[u8],
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> StorageResult<Option<Vec<u8>>> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        Ok(cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .ok())
    }
}

pub(crate) fn parse_array<const N: usize>(bytes: &[u8], label: &str) -> StorageResult<[u8; N]> {
    <[u8; N]>::try_from(bytes).map_err(|_| {
        StorageError::InvalidEnvelope(format!(
            "{label} length mismatch: expected {N}, got {}",
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests_utils::{InMemoryKeystore, UnavailableKeystore};
    use crate::storage::MemoryKeyValueStore;

    #[test]
    fn test_master_key_round_trip() {
        let keystore = InMemoryKeystore::new();
        let kv = MemoryKeyValueStore::new();
        let first = MasterKey::load_or_create(&keystore, &kv, 100).expect("init");
        let second = MasterKey::load_or_create(&keystore, &kv, 200).expect("init");

        assert_eq!(first.key, second.key);
        assert_eq!(first.key_id, second.key_id);
    }

    #[test]
    fn test_master_key_regenerated_when_device_key_changes() {
        let keystore = InMemoryKeystore::new();
        let kv = MemoryKeyValueStore::new();
        let first = MasterKey::load_or_create(&keystore, &kv, 100).expect("init");

        let other_keystore = InMemoryKeystore::new();
        let second = MasterKey::load_or_create(&other_keystore, &kv, 200).expect("init");
        assert_ne!(first.key_id, second.key_id);

        // the new envelope is now the persisted one
        let third = MasterKey::load_or_create(&other_keystore, &kv, 300).expect("init");
        assert_eq!(second.key_id, third.key_id);
    }

    #[test]
    fn test_master_key_unavailable_keystore_fails() {
        let kv = MemoryKeyValueStore::new();
        match MasterKey::load_or_create(&UnavailableKeystore, &kv, 100) {
            Err(StorageError::Keystore(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_master_key_tampered_envelope_fails() {
        let keystore = InMemoryKeystore::new();
        let kv = MemoryKeyValueStore::new();
        MasterKey::load_or_create(&keystore, &kv, 123).expect("init");

        kv.write(
            META_NAMESPACE.to_string(),
            MASTER_KEY_ENTRY.to_string(),
            "AAAA".to_string(),
        )
        .expect("write");

        match MasterKey::load_or_create(&keystore, &kv, 456) {
            Err(
                StorageError::Serialization(_)
                | StorageError::InvalidEnvelope(_)
                | StorageError::UnsupportedEnvelopeVersion(_),
            ) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_seal_open_detects_tampering() {
        let keystore = InMemoryKeystore::new();
        let kv = MemoryKeyValueStore::new();
        let key = MasterKey::load_or_create(&keystore, &kv, 1).expect("init");

        let (nonce, mut ciphertext) = key.seal(b"ad", b"hello").expect("seal");
        assert_eq!(ciphertext.len(), b"hello".len() + TAG_LEN);
        assert_eq!(
            key.open(b"ad", &nonce, &ciphertext).expect("open"),
            Some(b"hello".to_vec())
        );
        assert_eq!(key.open(b"other", &nonce, &ciphertext).expect("open"), None);

        ciphertext[0] ^= 0x01;
        assert_eq!(key.open(b"ad", &nonce, &ciphertext).expect("open"), None);
    }

    #[test]
    fn test_debug_redacts_key() {
        let keystore = InMemoryKeystore::new();
        let kv = MemoryKeyValueStore::new();
        let key = MasterKey::load_or_create(&keystore, &kv, 1).expect("init");
        let rendered = format!("{key:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains(&hex::encode(key.key)));
    }
}
