//! Authentication tokens attached to every outbound request.
//!
//! A token proves possession of the device signing key:
//!
//! ```text
//! message = CBOR [nonce: uint, device_id: uint]
//! payload = CBOR [bytes(message), bytes(ed25519_signature(message))]
//! token   = lowercase_hex(payload)
//! ```
//!
//! The nonce is `epoch_millis + random(0..1000)`. It is a freshness hint that
//! lets the server bound token age, not a server-issued challenge, so a token
//! captured in transit can be replayed until the server's freshness window
//! closes.

use ciborium::Value;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, SIGNATURE_LENGTH};
use rand::{rngs::OsRng, Rng};
use thiserror::Error;

use crate::error::OracleKitError;

/// Upper bound (exclusive) of the random jitter added to the nonce.
pub const NONCE_JITTER_MS: u64 = 1000;

/// Errors raised while minting or decoding tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    /// CBOR encoding failed.
    #[error("token encoding failed: {0}")]
    Encoding(String),
    /// The signing key refused to sign.
    #[error("token signing failed: {0}")]
    Signing(String),
    /// The key bytes are not a valid Ed25519 key.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// The token is not hexadecimal.
    #[error("token is not valid hex: {0}")]
    InvalidHex(String),
    /// The token does not follow the expected CBOR layout.
    #[error("malformed token: {0}")]
    Malformed(String),
    /// Bytes remain after the CBOR payload.
    #[error("trailing bytes after token payload")]
    TrailingBytes,
    /// The signature does not verify under the given public key.
    #[error("token signature is invalid")]
    InvalidSignature,
}

/// The signed claims carried by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Record)]
pub struct AuthTokenClaims {
    /// Freshness nonce, epoch millis plus jitter.
    pub nonce: u64,
    /// Device identifier of the signer.
    pub device_id: u32,
}

/// A token split back into its signed message and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    message: Vec<u8>,
    signature: [u8; SIGNATURE_LENGTH],
    claims: AuthTokenClaims,
}

/// Returns a freshness nonce for `now_millis`.
#[must_use]
pub fn freshness_nonce(now_millis: u64) -> u64 {
    now_millis.saturating_add(OsRng.gen_range(0..NONCE_JITTER_MS))
}

/// Canonical CBOR encoding of `[nonce, device_id]`.
///
/// # Errors
///
/// Returns [`TokenError::Encoding`] if serialization fails.
pub fn encode_message(nonce: u64, device_id: u32) -> Result<Vec<u8>, TokenError> {
    to_cbor(&Value::Array(vec![
        Value::Integer(nonce.into()),
        Value::Integer(device_id.into()),
    ]))
}

/// Mints a token for `device_id` using the current time `now_millis`.
///
/// # Errors
///
/// Returns an error if encoding or signing fails. An empty token is never
/// returned.
pub fn mint(
    signing_key: &SigningKey,
    device_id: u32,
    now_millis: u64,
) -> Result<String, TokenError> {
    mint_with_nonce(signing_key, freshness_nonce(now_millis), device_id)
}

/// Mints a token with an explicit nonce.
///
/// # Errors
///
/// Returns an error if encoding or signing fails.
pub fn mint_with_nonce(
    signing_key: &SigningKey,
    nonce: u64,
    device_id: u32,
) -> Result<String, TokenError> {
    let message = encode_message(nonce, device_id)?;
    let signature = signing_key
        .try_sign(&message)
        .map_err(|err| TokenError::Signing(err.to_string()))?;
    let payload = to_cbor(&Value::Array(vec![
        Value::Bytes(message),
        Value::Bytes(signature.to_bytes().to_vec()),
    ]))?;
    Ok(hex::encode(payload))
}

/// Parses a 32-byte Ed25519 secret key.
///
/// # Errors
///
/// Returns [`TokenError::InvalidKey`] if `bytes` has the wrong length.
pub fn signing_key_from_bytes(bytes: &[u8]) -> Result<SigningKey, TokenError> {
    let secret: &[u8; 32] = bytes.try_into().map_err(|_| {
        TokenError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len()))
    })?;
    Ok(SigningKey::from_bytes(secret))
}

/// Parses a 32-byte Ed25519 public key.
///
/// # Errors
///
/// Returns [`TokenError::InvalidKey`] if the bytes are not a valid point.
pub fn verifying_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, TokenError> {
    let bytes: &[u8; 32] = bytes.try_into().map_err(|_| {
        TokenError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len()))
    })?;
    VerifyingKey::from_bytes(bytes).map_err(|err| TokenError::InvalidKey(err.to_string()))
}

impl DecodedToken {
    /// Decodes a hex token into message, signature and claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the hex, the outer payload or the inner message do
    /// not follow the token layout exactly.
    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let payload = hex::decode(token).map_err(|err| TokenError::InvalidHex(err.to_string()))?;
        let mut parts = into_array(from_cbor(&payload)?, 2, "payload")?.into_iter();

        let message = match parts.next() {
            Some(Value::Bytes(bytes)) => bytes,
            _ => return Err(TokenError::Malformed("message is not a byte string".to_string())),
        };
        let signature: [u8; SIGNATURE_LENGTH] = match parts.next() {
            Some(Value::Bytes(bytes)) => bytes.as_slice().try_into().map_err(|_| {
                TokenError::Malformed(format!("signature has {} bytes", bytes.len()))
            })?,
            _ => return Err(TokenError::Malformed("signature is not a byte string".to_string())),
        };

        let mut fields = into_array(from_cbor(&message)?, 2, "message")?.into_iter();
        let nonce = fields
            .next()
            .and_then(|value| value.into_integer().ok())
            .and_then(|int| u64::try_from(int).ok())
            .ok_or_else(|| TokenError::Malformed("nonce is not an unsigned integer".to_string()))?;
        let device_id = fields
            .next()
            .and_then(|value| value.into_integer().ok())
            .and_then(|int| u32::try_from(int).ok())
            .ok_or_else(|| TokenError::Malformed("device id is not a u32".to_string()))?;

        Ok(Self {
            message,
            signature,
            claims: AuthTokenClaims { nonce, device_id },
        })
    }

    /// The signed claims.
    #[must_use]
    pub const fn claims(&self) -> AuthTokenClaims {
        self.claims
    }

    /// The CBOR message exactly as signed.
    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Raw signature bytes.
    #[must_use]
    pub const fn signature(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.signature
    }

    /// Checks the signature under `public_key`.
    ///
    /// Freshness of the nonce is the server's policy and is not checked here.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidSignature`] if verification fails.
    pub fn verify(&self, public_key: &VerifyingKey) -> Result<(), TokenError> {
        public_key
            .verify_strict(&self.message, &Signature::from_bytes(&self.signature))
            .map_err(|_| TokenError::InvalidSignature)
    }
}

/// Decodes `token` and returns its claims without checking the signature.
///
/// # Errors
///
/// Returns [`OracleKitError::InvalidInput`] if the token is malformed.
#[uniffi::export]
pub fn decode_auth_token(token: String) -> Result<AuthTokenClaims, OracleKitError> {
    Ok(DecodedToken::decode(&token)?.claims())
}

/// Decodes `token`, verifies it under `public_key` and returns its claims.
///
/// # Errors
///
/// Returns [`OracleKitError::IdentityMismatch`] if the signature does not
/// verify, and [`OracleKitError::InvalidInput`] for malformed input.
#[uniffi::export]
pub fn verify_auth_token(
    token: String,
    public_key: Vec<u8>,
) -> Result<AuthTokenClaims, OracleKitError> {
    let decoded = DecodedToken::decode(&token)?;
    decoded.verify(&verifying_key_from_bytes(&public_key)?)?;
    Ok(decoded.claims())
}

fn to_cbor(value: &Value) -> Result<Vec<u8>, TokenError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|err| TokenError::Encoding(err.to_string()))?;
    Ok(out)
}

fn from_cbor(bytes: &[u8]) -> Result<Value, TokenError> {
    let mut reader = bytes;
    let value: Value = ciborium::de::from_reader(&mut reader)
        .map_err(|err| TokenError::Malformed(err.to_string()))?;
    if !reader.is_empty() {
        return Err(TokenError::TrailingBytes);
    }
    Ok(value)
}

fn into_array(value: Value, len: usize, label: &str) -> Result<Vec<Value>, TokenError> {
    match value {
        Value::Array(items) if items.len() == len => Ok(items),
        _ => Err(TokenError::Malformed(format!("{label} is not a {len}-element array"))),
    }
}
