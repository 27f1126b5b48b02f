//! Error types for secure storage components.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by secure storage primitives.
#[derive(Debug, Error, uniffi::Error)]
pub enum StorageError {
    /// The device keystore is unavailable or refused the operation.
    #[error("keystore error: {0}")]
    Keystore(String),

    /// Errors coming from the key-value persistence layer.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Errors coming from the per-key lock manager.
    #[error("storage lock error: {0}")]
    Lock(String),

    /// Serialization/deserialization failures.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Cryptographic failures while sealing (AEAD, HKDF, etc.).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A stored record failed authentication: it was tampered with or was
    /// sealed under a different master key.
    #[error("decryption failed for `{key}`: {reason}")]
    DecryptionFailed {
        /// Logical key of the record.
        key: String,
        /// What failed.
        reason: String,
    },

    /// Invalid or malformed master key envelope or secret record.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Unsupported envelope or record version.
    #[error("unsupported envelope version: {0}")]
    UnsupportedEnvelopeVersion(u32),

    /// Unexpected `UniFFI` callback error.
    #[error("unexpected uniffi callback error: {0}")]
    UnexpectedUniFFICallbackError(String),
}

impl StorageError {
    /// Returns `true` when the error means the backing platform could not be
    /// reached, as opposed to data being present but unreadable.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Keystore(_)
                | Self::Persistence(_)
                | Self::Lock(_)
                | Self::UnexpectedUniFFICallbackError(_)
        )
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for StorageError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(error.reason)
    }
}
