//! Encrypted storage for device secrets.
//!
//! The platform supplies two boundaries: a [`DeviceKeystore`] that wraps the
//! master key with a device-bound key, and a [`KeyValueStore`] for persistence.
//! [`SecureStore`] combines them.

pub mod error;
pub mod file;
pub mod keys;
pub mod lock;
pub mod memory;
pub mod records;
pub mod secure_store;
pub mod software_keystore;
pub mod traits;

pub(crate) mod envelope;

#[cfg(test)]
pub(crate) mod tests_utils;

pub use error::{StorageError, StorageResult};
pub use file::FileKeyValueStore;
pub use keys::{MasterKey, NONCE_LEN, TAG_LEN};
pub use lock::KeyLockManager;
pub use memory::MemoryKeyValueStore;
pub use records::SecretRecord;
pub use secure_store::SecureStore;
pub use software_keystore::SoftwareKeystore;
pub use traits::{DeviceKeystore, KeyValueStore};

/// Namespace holding sealed secret records.
pub const SECURE_NAMESPACE: &str = "oraclekit.secure";

/// Namespace holding plaintext, non-sensitive values.
pub const RAW_NAMESPACE: &str = "oraclekit.raw";

/// Namespace holding storage metadata such as the master key envelope.
pub const META_NAMESPACE: &str = "oraclekit.meta";

pub(crate) const MASTER_KEY_ENTRY: &str = "master_key";
pub(crate) const MASTER_KEY_ENVELOPE_AD: &[u8] = b"oraclekit:master-key-envelope";
pub(crate) const SECRET_RECORD_AD: &[u8] = b"oraclekit:secret:";
