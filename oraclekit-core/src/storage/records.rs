//! Encoding of sealed secret records.
//!
//! A record is stored as a single base64 CBOR value so the persistence layer
//! writes nonce and ciphertext in one all-or-nothing operation.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use super::keys::{parse_array, NONCE_LEN, TAG_LEN};

const RECORD_VERSION: u32 = 1;

/// A sealed value as persisted in the secure namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    version: u32,
    key_id: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl SecretRecord {
    pub(crate) fn new(key_id: &[u8], nonce: [u8; NONCE_LEN], ciphertext: Vec<u8>) -> Self {
        Self {
            version: RECORD_VERSION,
            key_id: key_id.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        }
    }

    /// Identifier of the master key that sealed this record.
    #[must_use]
    pub fn key_id(&self) -> &[u8] {
        &self.key_id
    }

    /// The AEAD nonce of this record.
    ///
    /// # Errors
    ///
    /// Never fails for a record produced by [`SecretRecord::decode`].
    pub fn nonce(&self) -> StorageResult<[u8; NONCE_LEN]> {
        parse_array::<NONCE_LEN>(&self.nonce, "nonce")
    }

    /// Ciphertext followed by the authentication tag.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub(crate) fn encode(&self) -> StorageResult<String> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(STANDARD.encode(bytes))
    }

    /// Parses a stored record, rejecting anything that is not well-formed.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not base64 CBOR, has an unknown
    /// version, or violates the nonce/tag length invariants.
    pub fn decode(encoded: &str) -> StorageResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|err| StorageError::InvalidEnvelope(err.to_string()))?;
        let record: Self = ciborium::de::from_reader(bytes.as_slice())
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        if record.version != RECORD_VERSION {
            return Err(StorageError::UnsupportedEnvelopeVersion(record.version));
        }
        if record.nonce.len() != NONCE_LEN {
            return Err(StorageError::InvalidEnvelope(format!(
                "nonce length mismatch: expected {NONCE_LEN}, got {}",
                record.nonce.len()
            )));
        }
        if record.ciphertext.len() < TAG_LEN {
            return Err(StorageError::InvalidEnvelope(
                "ciphertext shorter than the authentication tag".to_string(),
            ));
        }
        Ok(record)
    }

    #[cfg(test)]
    pub(crate) fn ciphertext_mut(&mut self) -> &mut Vec<u8> {
        &mut self.ciphertext
    }

    #[cfg(test)]
    pub(crate) fn nonce_mut(&mut self) -> &mut Vec<u8> {
        &mut self.nonce
    }
}
