//! Platform interfaces for secure storage.

use super::error::StorageResult;

/// Device keystore interface used to wrap and unwrap the store's master key.
///
/// Platform implementations should use hardware-backed keystores where available:
/// - Android: Android Keystore, AES-256-GCM key under a fixed alias
/// - iOS: Keychain Services with `kSecAttrAccessibleAfterFirstUnlockThisDeviceOnly`
/// - Desktop/CLI: [`SoftwareKeystore`](super::SoftwareKeystore), which is weaker
///
/// Implementations must return [`StorageError::Keystore`] when the keystore
/// itself cannot be reached and [`StorageError::Crypto`] when authentication
/// of `ciphertext` fails. The store relies on this distinction to tell an
/// unavailable keystore apart from a lost or rotated device key.
///
/// [`StorageError::Keystore`]: super::StorageError::Keystore
/// [`StorageError::Crypto`]: super::StorageError::Crypto
#[uniffi::export(with_foreign)]
pub trait DeviceKeystore: Send + Sync {
    /// Seals plaintext under the device-bound key, authenticating `associated_data`.
    ///
    /// The associated data is not encrypted, but it is integrity-protected as part
    /// of the seal operation. Any mismatch when opening must fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the keystore refuses the operation or the seal fails.
    fn seal(
        &self,
        associated_data: Vec<u8>,
        plaintext: Vec<u8>,
    ) -> StorageResult<Vec<u8>>;

    /// Opens ciphertext under the device-bound key, verifying `associated_data`.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails or the keystore cannot open.
    fn open_sealed(
        &self,
        associated_data: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> StorageResult<Vec<u8>>;
}

/// Durable string-keyed, string-valued storage (shared preferences, user
/// defaults, a JSON file).
///
/// A single `write` must be all-or-nothing: readers observe either the
/// previous value or the new one, never a torn value.
#[uniffi::export(with_foreign)]
pub trait KeyValueStore: Send + Sync {
    /// Reads `key` from `namespace`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn read(&self, namespace: String, key: String) -> StorageResult<Option<String>>;

    /// Writes `value` under `key` in `namespace`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write(&self, namespace: String, key: String, value: String) -> StorageResult<()>;

    /// Removes `key` from `namespace`. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error only for actual persistence failures.
    fn remove(&self, namespace: String, key: String) -> StorageResult<()>;
}
