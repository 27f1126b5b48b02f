//! Device signing identity and stable device identifier.

use std::sync::{Arc, Mutex, MutexGuard};

use ed25519_dalek::SigningKey;
use secrecy::{ExposeSecret, SecretBox};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::OracleKitError;
use crate::storage::SecureStore;
use crate::token::{self, signing_key_from_bytes};

/// Secure-namespace entry holding the Ed25519 secret key.
pub const PRIVATE_KEY_ENTRY: &str = "privateKey";
/// Secure-namespace entry holding the wallet mnemonic.
pub const MNEMONIC_ENTRY: &str = "mnemonic";
/// Raw-namespace entry holding the hex public key.
pub const PUBLIC_KEY_ENTRY: &str = "publicKey";
/// Raw-namespace entry holding the decimal device id.
pub const DEVICE_ID_ENTRY: &str = "deviceId";

const DEVICE_ID_DOMAIN: &[u8] = b"oraclekit:device-id:";

/// Key material produced by the host's wallet library.
#[derive(Clone, uniffi::Record)]
pub struct GeneratedWallet {
    /// 32-byte Ed25519 secret key.
    pub private_key: Vec<u8>,
    /// 32-byte Ed25519 public key matching `private_key`.
    pub public_key: Vec<u8>,
    /// Recovery phrase the key was derived from.
    pub mnemonic: String,
}

impl std::fmt::Debug for GeneratedWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedWallet")
            .field("private_key", &"[REDACTED]")
            .field("public_key", &hex::encode(&self.public_key))
            .field("mnemonic", &"[REDACTED]")
            .finish()
    }
}

/// Wallet generation, delegated to the host's wallet library.
#[uniffi::export(with_foreign)]
pub trait WalletGenerator: Send + Sync {
    /// Generates a fresh wallet.
    ///
    /// # Errors
    ///
    /// Implementations return [`OracleKitError::CollaboratorFailed`] when the
    /// wallet library fails.
    fn generate(&self) -> Result<GeneratedWallet, OracleKitError>;
}

/// Platform-provided identifiers used to derive the device id.
#[uniffi::export(with_foreign)]
pub trait DeviceIdSource: Send + Sync {
    /// Per-install platform identifier (e.g. `ANDROID_ID`).
    fn platform_id(&self) -> Option<String>;

    /// Hardware serial number, if the platform still exposes one.
    fn hardware_serial(&self) -> Option<String>;
}

/// The device's signing keypair and identifier.
///
/// The secret key is persisted through [`SecureStore`] and cached in memory as
/// a [`SecretBox`] after the first load. Initialization is serialized, so
/// concurrent first callers observe one keypair.
pub struct DeviceIdentity {
    store: Arc<SecureStore>,
    wallets: Arc<dyn WalletGenerator>,
    id_source: Arc<dyn DeviceIdSource>,
    signing_key: Mutex<Option<SecretBox<[u8; 32]>>>,
    device_id: Mutex<Option<u32>>,
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity").finish_non_exhaustive()
    }
}

impl DeviceIdentity {
    /// Creates an identity backed by `store`. Nothing is loaded until first use.
    #[must_use]
    pub fn new(
        store: Arc<SecureStore>,
        wallets: Arc<dyn WalletGenerator>,
        id_source: Arc<dyn DeviceIdSource>,
    ) -> Self {
        Self {
            store,
            wallets,
            id_source,
            signing_key: Mutex::new(None),
            device_id: Mutex::new(None),
        }
    }

    /// Loads the keypair, generating and persisting one if none exists.
    ///
    /// The stored public key is derived data: if it is missing or does not
    /// match the stored private key, it is rewritten from the private key.
    ///
    /// # Errors
    ///
    /// Returns [`OracleKitError::DecryptionFailed`] if a stored key cannot be
    /// opened, and storage or wallet errors otherwise.
    pub fn ensure_loaded(&self) -> Result<(), OracleKitError> {
        let mut cached = self.key_slot()?;
        if cached.is_some() {
            return Ok(());
        }

        if let Some(stored) = self.store.get(PRIVATE_KEY_ENTRY)? {
            let signing_key = signing_key_from_bytes(&stored)?;
            self.repair_public_key(&signing_key)?;
            *cached = Some(SecretBox::new(Box::new(signing_key.to_bytes())));
            log::debug!("device signing key loaded");
            return Ok(());
        }

        log::info!("no device signing key found, generating a new wallet");
        let wallet = self.wallets.generate()?;
        self.persist(&wallet, &mut cached)
    }

    /// Replaces the keypair with `wallet` (the "change key" action).
    ///
    /// The private key write is the commit point. If it fails, the previous
    /// keypair stays active. If a later write fails, the new key is already
    /// active and the error is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`OracleKitError::IdentityMismatch`] if the public key does not
    /// belong to the private key, or a storage error if persisting fails.
    pub fn replace(&self, wallet: &GeneratedWallet) -> Result<(), OracleKitError> {
        let mut cached = self.key_slot()?;
        self.persist(wallet, &mut cached)?;
        log::info!("device signing key replaced");
        Ok(())
    }

    /// Returns `true` if a signing key is stored, without decrypting it.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be read.
    pub fn has_wallet(&self) -> Result<bool, OracleKitError> {
        Ok(self.store.contains(PRIVATE_KEY_ENTRY)?)
    }

    /// The Ed25519 public key.
    ///
    /// # Errors
    ///
    /// Fails like [`DeviceIdentity::ensure_loaded`].
    pub fn public_key(&self) -> Result<Vec<u8>, OracleKitError> {
        self.with_signing_key(|key| key.verifying_key().to_bytes().to_vec())
    }

    /// The stored wallet mnemonic, if any.
    ///
    /// # Errors
    ///
    /// Returns [`OracleKitError::DecryptionFailed`] if the record is unreadable.
    pub fn mnemonic(&self) -> Result<Option<Zeroizing<String>>, OracleKitError> {
        let Some(bytes) = self.store.get(MNEMONIC_ENTRY)? else {
            return Ok(None);
        };
        let mnemonic = String::from_utf8(bytes.to_vec()).map_err(|_| {
            OracleKitError::DecryptionFailed {
                key: MNEMONIC_ENTRY.to_string(),
                reason: "mnemonic is not valid UTF-8".to_string(),
            }
        })?;
        Ok(Some(Zeroizing::new(mnemonic)))
    }

    /// Runs `f` with the signing key, loading it first if needed.
    ///
    /// # Errors
    ///
    /// Fails like [`DeviceIdentity::ensure_loaded`].
    pub fn with_signing_key<R>(
        &self,
        f: impl FnOnce(&SigningKey) -> R,
    ) -> Result<R, OracleKitError> {
        self.ensure_loaded()?;
        let cached = self.key_slot()?;
        let secret = cached.as_ref().ok_or_else(|| OracleKitError::KeyAbsent {
            key: PRIVATE_KEY_ENTRY.to_string(),
        })?;
        let key = SigningKey::from_bytes(secret.expose_secret());
        Ok(f(&key))
    }

    /// Mints a fresh authentication token for this device.
    ///
    /// # Errors
    ///
    /// Returns [`OracleKitError::SigningFailed`] or
    /// [`OracleKitError::EncodingFailed`] if the token cannot be produced, and
    /// identity loading errors otherwise.
    pub fn mint_token(&self, now_millis: u64) -> Result<String, OracleKitError> {
        let device_id = self.device_id()?;
        let minted = self.with_signing_key(|key| token::mint(key, device_id, now_millis))?;
        minted.map_err(Into::into)
    }

    /// The stable device identifier.
    ///
    /// Derived on first call from the platform id, falling back to the
    /// hardware serial and finally to a random UUID, then persisted and never
    /// regenerated.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the id cannot be read or persisted.
    pub fn device_id(&self) -> Result<u32, OracleKitError> {
        let mut cached = self
            .device_id
            .lock()
            .map_err(|_| OracleKitError::StorageUnavailable {
                message: "device id lock poisoned".to_string(),
            })?;
        if let Some(id) = *cached {
            return Ok(id);
        }

        let id = if let Some(stored) = self.store.get_raw(DEVICE_ID_ENTRY)? {
            stored
                .parse::<u32>()
                .map_err(|err| OracleKitError::StorageUnavailable {
                    message: format!("stored device id is corrupt: {err}"),
                })?
        } else {
            let (source, seed) = self.device_id_seed();
            let id = derive_device_id(&seed);
            self.store.set_raw(DEVICE_ID_ENTRY, &id.to_string())?;
            log::info!("derived device id {id} from {source}");
            id
        };
        *cached = Some(id);
        Ok(id)
    }

    fn device_id_seed(&self) -> (&'static str, String) {
        let usable = |value: Option<String>| {
            value.filter(|v| !v.trim().is_empty() && !v.eq_ignore_ascii_case("unknown"))
        };
        if let Some(id) = usable(self.id_source.platform_id()) {
            return ("platform id", id);
        }
        if let Some(serial) = usable(self.id_source.hardware_serial()) {
            return ("hardware serial", serial);
        }
        ("random uuid", uuid::Uuid::new_v4().to_string())
    }

    fn persist(
        &self,
        wallet: &GeneratedWallet,
        cached: &mut Option<SecretBox<[u8; 32]>>,
    ) -> Result<(), OracleKitError> {
        let signing_key = signing_key_from_bytes(&wallet.private_key)?;
        check_public_key(&signing_key, &wallet.public_key)?;

        self.store.put(PRIVATE_KEY_ENTRY, &wallet.private_key)?;
        *cached = Some(SecretBox::new(Box::new(signing_key.to_bytes())));

        let finished = self
            .store
            .set_raw(PUBLIC_KEY_ENTRY, &hex::encode(&wallet.public_key))
            .and_then(|()| self.store.put(MNEMONIC_ENTRY, wallet.mnemonic.as_bytes()));
        if let Err(err) = finished {
            log::warn!("new signing key stored, but its companion records were not: {err}");
            // A mnemonic of the previous wallet must not outlive its key.
            if let Err(cleanup) = self.store.delete(MNEMONIC_ENTRY) {
                log::warn!("failed to remove the stale mnemonic: {cleanup}");
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn repair_public_key(&self, signing_key: &SigningKey) -> Result<(), OracleKitError> {
        let derived = hex::encode(signing_key.verifying_key().as_bytes());
        match self.store.get_raw(PUBLIC_KEY_ENTRY)? {
            Some(stored) if stored == derived => Ok(()),
            Some(_) => {
                log::warn!("stored public key does not match the private key, rewriting it");
                Ok(self.store.set_raw(PUBLIC_KEY_ENTRY, &derived)?)
            }
            None => Ok(self.store.set_raw(PUBLIC_KEY_ENTRY, &derived)?),
        }
    }

    fn key_slot(&self) -> Result<MutexGuard<'_, Option<SecretBox<[u8; 32]>>>, OracleKitError> {
        self.signing_key
            .lock()
            .map_err(|_| OracleKitError::StorageUnavailable {
                message: "signing key lock poisoned".to_string(),
            })
    }
}

fn check_public_key(signing_key: &SigningKey, public_key: &[u8]) -> Result<(), OracleKitError> {
    let derived = signing_key.verifying_key();
    if bool::from(derived.as_bytes().as_slice().ct_eq(public_key)) {
        Ok(())
    } else {
        Err(OracleKitError::IdentityMismatch {
            message: "public key does not match the private key".to_string(),
        })
    }
}

/// Truncates `SHA-256(domain || seed)` to a big-endian `u32`.
fn derive_device_id(seed: &str) -> u32 {
    let digest = Sha256::new()
        .chain_update(DEVICE_ID_DOMAIN)
        .chain_update(seed.as_bytes())
        .finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
