//! Master key envelope persistence helpers.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};

const ENVELOPE_VERSION: u32 = 1;

/// The device-wrapped master key as it is written to the meta namespace.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct MasterKeyEnvelope {
    pub(crate) version: u32,
    pub(crate) key_id: Vec<u8>,
    pub(crate) wrapped_key: Vec<u8>,
    pub(crate) created_at: u64,
}

impl MasterKeyEnvelope {
    pub(crate) const fn new(key_id: Vec<u8>, wrapped_key: Vec<u8>, now: u64) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            key_id,
            wrapped_key,
            created_at: now,
        }
    }

    /// Encodes the envelope as base64 CBOR so it fits a string-valued store.
    pub(crate) fn encode(&self) -> StorageResult<String> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(STANDARD.encode(bytes))
    }

    pub(crate) fn decode(encoded: &str) -> StorageResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|err| StorageError::InvalidEnvelope(err.to_string()))?;
        let envelope: Self = ciborium::de::from_reader(bytes.as_slice())
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(StorageError::UnsupportedEnvelopeVersion(envelope.version));
        }
        Ok(envelope)
    }
}
