//! Host-side collaborators for running the client on a desktop machine.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use oraclekit_core::storage::{FileKeyValueStore, SoftwareKeystore};
use oraclekit_core::{
    DeviceIdSource, GeneratedWallet, OracleClient, OracleConfig, OracleKitError, WalletGenerator,
};
use rand::rngs::OsRng;

const KEYSTORE_ALIAS: &str = "oraclekit.master";
const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Generates wallets from the OS RNG.
///
/// There is no word list on the desktop, so the "mnemonic" is the hex seed.
pub struct RandomWallets;

impl WalletGenerator for RandomWallets {
    fn generate(&self) -> Result<GeneratedWallet, OracleKitError> {
        let key = SigningKey::generate(&mut OsRng);
        Ok(GeneratedWallet {
            private_key: key.to_bytes().to_vec(),
            public_key: key.verifying_key().to_bytes().to_vec(),
            mnemonic: hex::encode(key.to_bytes()),
        })
    }
}

/// Device identifiers from the environment and `/etc/machine-id`.
pub struct HostIds {
    pub override_id: Option<String>,
}

impl DeviceIdSource for HostIds {
    fn platform_id(&self) -> Option<String> {
        self.override_id.clone().or_else(|| {
            fs::read_to_string(MACHINE_ID_PATH)
                .ok()
                .map(|id| id.trim().to_string())
        })
    }

    fn hardware_serial(&self) -> Option<String> {
        std::env::var("HOSTNAME").ok()
    }
}

/// Default data directory, e.g. `~/.local/share/oraclekit`.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("oraclekit")
}

/// Opens a client whose store and keystore live under `data_dir`.
pub fn open_client(
    config: OracleConfig,
    data_dir: &Path,
    device_id: Option<String>,
) -> eyre::Result<Arc<OracleClient>> {
    fs::create_dir_all(data_dir)?;
    let kv = FileKeyValueStore::open(data_dir.join("store"))?;
    let keystore = SoftwareKeystore::open(data_dir.join("keystore"), KEYSTORE_ALIAS)?;
    let client = OracleClient::new(
        config,
        Arc::new(kv),
        Arc::new(keystore),
        Arc::new(RandomWallets),
        Arc::new(HostIds {
            override_id: device_id,
        }),
    )?;
    Ok(client)
}
