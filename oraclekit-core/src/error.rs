//! Errors returned across the FFI boundary.

use thiserror::Error;

use crate::storage::StorageError;
use crate::token::TokenError;

/// Error outputs from `OracleKit`
#[derive(Debug, Clone, Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum OracleKitError {
    /// The keystore or the persistence layer cannot serve the request
    #[error("storage_unavailable: {message}")]
    StorageUnavailable {
        /// Underlying failure.
        message: String,
    },
    /// A stored record exists but failed authentication. Never reported as absent.
    #[error("decryption_failed: `{key}`: {reason}")]
    DecryptionFailed {
        /// Logical key of the record.
        key: String,
        /// Why the record was rejected.
        reason: String,
    },
    /// Key material required by the operation has not been provisioned
    #[error("key_absent: {key}")]
    KeyAbsent {
        /// Logical key that was expected.
        key: String,
    },
    /// Producing a signature failed
    #[error("signing_failed: {message}")]
    SigningFailed {
        /// Underlying failure.
        message: String,
    },
    /// Canonical encoding of a message or token failed
    #[error("encoding_failed: {message}")]
    EncodingFailed {
        /// Underlying failure.
        message: String,
    },
    /// The request did not complete within the configured timeouts
    #[error("network_timeout: {url}")]
    NetworkTimeout {
        /// Target of the request.
        url: String,
    },
    /// Network connection error with details
    #[error("network_error: {url}: {error}")]
    NetworkError {
        /// Target of the request.
        url: String,
        /// Underlying failure.
        error: String,
    },
    /// The server failed to answer a one-shot request (5xx). Poll results
    /// carry statuses in the published body instead.
    #[error("http_error: {status}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Response body, as received.
        body: String,
    },
    /// The presented input is not valid for the requested operation
    #[error("invalid_input: {attribute}: {reason}")]
    InvalidInput {
        /// Offending field or argument.
        attribute: String,
        /// What is wrong with it.
        reason: String,
    },
    /// A public key does not belong to the private key it is paired with
    #[error("identity_mismatch: {message}")]
    IdentityMismatch {
        /// Details.
        message: String,
    },
    /// An async operation was invoked outside of a Tokio runtime
    #[error("runtime_unavailable: {message}")]
    RuntimeUnavailable {
        /// Details.
        message: String,
    },
    /// A host-provided collaborator (wallet library, callback) failed
    #[error("collaborator_failed: {message}")]
    CollaboratorFailed {
        /// Details reported by the host.
        message: String,
    },
}

impl From<StorageError> for OracleKitError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::DecryptionFailed { key, reason } => {
                Self::DecryptionFailed { key, reason }
            }
            other => Self::StorageUnavailable {
                message: other.to_string(),
            },
        }
    }
}

impl From<TokenError> for OracleKitError {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::Signing(message) => Self::SigningFailed { message },
            TokenError::Encoding(message) => Self::EncodingFailed { message },
            TokenError::InvalidKey(reason) => Self::InvalidInput {
                attribute: "private_key".to_string(),
                reason,
            },
            TokenError::InvalidSignature => Self::IdentityMismatch {
                message: "signature does not verify under the given public key".to_string(),
            },
            other => Self::InvalidInput {
                attribute: "token".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for OracleKitError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::CollaboratorFailed {
            message: error.reason,
        }
    }
}
