//! Common test utilities shared across integration tests.
#![allow(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use ed25519_dalek::SigningKey;
use oraclekit_core::clock::FixedClock;
use oraclekit_core::storage::{DeviceKeystore, MemoryKeyValueStore, StorageError};
use oraclekit_core::{
    DeviceIdSource, GeneratedWallet, OracleClient, OracleConfig, OracleKitError, WalletGenerator,
};
use rand::{rngs::OsRng, RngCore};

pub const FIXED_MILLIS: u64 = 1_700_000_000_000;
pub const FIXED_TIME: &str = "10:00:00";

pub struct InMemoryKeystore {
    key: [u8; 32],
}

impl InMemoryKeystore {
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }
}

impl Default for InMemoryKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceKeystore for InMemoryKeystore {
    fn seal(
        &self,
        associated_data: Vec<u8>,
        plaintext: Vec<u8>,
    ) -> Result<Vec<u8>, StorageError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|err| StorageError::Keystore(err.to_string()))?;
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: &associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open_sealed(
        &self,
        associated_data: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> Result<Vec<u8>, StorageError> {
        if ciphertext.len() < 12 {
            return Err(StorageError::Crypto(
                "keystore ciphertext too short".to_string(),
            ));
        }
        let (nonce_bytes, payload) = ciphertext.split_at(12);
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|err| StorageError::Keystore(err.to_string()))?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: payload,
                    aad: &associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))
    }
}

/// Hands out deterministic wallets and counts how often it was asked.
pub struct FixedWallets {
    seed: [u8; 32],
    pub calls: AtomicUsize,
}

impl FixedWallets {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            seed,
            calls: AtomicUsize::new(0),
        }
    }

    #[allow(dead_code, reason = "used in tests")]
    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.seed)
    }

    #[allow(dead_code, reason = "used in tests")]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WalletGenerator for FixedWallets {
    fn generate(&self) -> Result<GeneratedWallet, OracleKitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = self.signing_key();
        Ok(GeneratedWallet {
            private_key: key.to_bytes().to_vec(),
            public_key: key.verifying_key().to_bytes().to_vec(),
            mnemonic: "legal winner thank year wave sausage worth useful legal winner thank yellow"
                .to_string(),
        })
    }
}

pub struct StaticIds;

impl DeviceIdSource for StaticIds {
    fn platform_id(&self) -> Option<String> {
        Some("9774d56d682e549c".to_string())
    }

    fn hardware_serial(&self) -> Option<String> {
        None
    }
}

pub struct TestClient {
    pub client: Arc<OracleClient>,
    #[allow(dead_code, reason = "used in tests")]
    pub wallets: Arc<FixedWallets>,
    #[allow(dead_code, reason = "used in tests")]
    pub kv: Arc<MemoryKeyValueStore>,
}

pub fn config(endpoint: &str, poll_interval_ms: u64) -> OracleConfig {
    OracleConfig {
        endpoint: endpoint.to_string(),
        poll_interval_ms,
        connect_timeout_ms: 1_000,
        read_timeout_ms: 5_000,
        ..OracleConfig::default()
    }
}

pub fn test_client(config: OracleConfig) -> TestClient {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let wallets = Arc::new(FixedWallets::new([42u8; 32]));
    let client = OracleClient::with_clock(
        config,
        kv.clone(),
        Arc::new(InMemoryKeystore::new()),
        wallets.clone(),
        Arc::new(StaticIds),
        Arc::new(FixedClock::new(FIXED_MILLIS, FIXED_TIME)),
    )
    .expect("create client");
    TestClient {
        client: Arc::new(client),
        wallets,
        kv,
    }
}
