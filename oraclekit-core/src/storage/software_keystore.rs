//! Software fallback for the device keystore.
//!
//! Derives an AES-256-GCM wrapping key with HKDF-SHA256 from a random device
//! secret kept in a `0600` file. This is weaker than a hardware-backed
//! keystore: anyone able to read the application's files can unwrap the
//! master key. Use it only where no platform keystore exists (desktop CLI,
//! development builds).

use std::fs;
use std::io::Write;
use std::path::Path;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use super::error::{StorageError, StorageResult};
use super::keys::NONCE_LEN;
use super::traits::DeviceKeystore;

const DEVICE_SECRET_FILENAME: &str = "device.secret";
const DEVICE_SECRET_LEN: usize = 32;
const HKDF_SALT: &[u8] = b"oraclekit:software-keystore:salt";

/// [`DeviceKeystore`] backed by a file-resident device secret.
pub struct SoftwareKeystore {
    wrapping_key: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for SoftwareKeystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareKeystore")
            .field("wrapping_key", &"[REDACTED]")
            .finish()
    }
}

impl SoftwareKeystore {
    /// Loads the device secret under `dir`, creating it on first use, and
    /// derives the wrapping key for `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Keystore`] if the secret cannot be read or
    /// created, or has the wrong length.
    pub fn open(dir: impl AsRef<Path>, alias: &str) -> StorageResult<Self> {
        let path = dir.as_ref().join(DEVICE_SECRET_FILENAME);
        let secret = load_or_create_secret(&path)?;
        Self::from_secret(&secret, alias)
    }

    /// Derives the wrapping key for `alias` from raw device secret bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Keystore`] if key derivation fails.
    pub fn from_secret(secret: &[u8], alias: &str) -> StorageResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret);
        let mut wrapping_key = Zeroizing::new([0u8; 32]);
        hk.expand(alias.as_bytes(), &mut *wrapping_key)
            .map_err(|err| StorageError::Keystore(format!("hkdf expand failed: {err}")))?;
        Ok(Self { wrapping_key })
    }

    fn cipher(&self) -> StorageResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&*self.wrapping_key)
            .map_err(|err| StorageError::Keystore(err.to_string()))
    }
}

impl DeviceKeystore for SoftwareKeystore {
    fn seal(
        &self,
        associated_data: Vec<u8>,
        plaintext: Vec<u8>,
    ) -> StorageResult<Vec<u8>> {
        let mut plaintext = plaintext;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &associated_data,
                },
            )
            .map_err(|_| StorageError::Crypto("wrapping key seal failed".to_string()));
        plaintext.zeroize();
        let ciphertext = ciphertext?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open_sealed(
        &self,
        associated_data: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> StorageResult<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(StorageError::Crypto(
                "keystore ciphertext too short".to_string(),
            ));
        }
        let (nonce, payload) = ciphertext.split_at(NONCE_LEN);
        self.cipher()?
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: payload,
                    aad: &associated_data,
                },
            )
            .map_err(|_| StorageError::Crypto("wrapping key authentication failed".to_string()))
    }
}

fn load_or_create_secret(path: &Path) -> StorageResult<Zeroizing<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => {
            let bytes = Zeroizing::new(bytes);
            if bytes.len() != DEVICE_SECRET_LEN {
                return Err(StorageError::Keystore(format!(
                    "device secret length mismatch: expected {DEVICE_SECRET_LEN}, got {}",
                    bytes.len()
                )));
            }
            Ok(bytes)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let mut secret = Zeroizing::new(vec![0u8; DEVICE_SECRET_LEN]);
            OsRng.fill_bytes(&mut secret);
            write_secret(path, &secret)?;
            log::info!("created software device secret at {}", path.display());
            Ok(secret)
        }
        Err(err) => Err(StorageError::Keystore(format!("read device secret: {err}"))),
    }
}

fn write_secret(path: &Path, secret: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| StorageError::Keystore(format!("create dir: {err}")))?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .map_err(|err| StorageError::Keystore(format!("create device secret: {err}")))?;
    file.write_all(secret)
        .and_then(|()| file.sync_all())
        .map_err(|err| StorageError::Keystore(format!("write device secret: {err}")))
}
