//! Device identity, encrypted credential storage and authenticated polling for
//! the PBG oracle client.
//!
//! The host application supplies platform boundaries (a [`KeyValueStore`], a
//! [`DeviceKeystore`], a [`WalletGenerator`] and a [`DeviceIdSource`]) and
//! drives everything through [`OracleClient`].

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod logger;
pub mod secrets;
pub mod status;
pub mod storage;
pub mod token;

mod client;
mod http_request;

pub use client::{OracleClient, SDK_VERSION};
pub use config::{OracleConfig, Stage};
pub use engine::EngineState;
pub use error::OracleKitError;
pub use identity::{DeviceIdSource, DeviceIdentity, GeneratedWallet, WalletGenerator};
pub use secrets::StageSecrets;
pub use status::{StatusChannel, StatusListener};
pub use storage::{DeviceKeystore, KeyValueStore, SecureStore};
pub use token::AuthTokenClaims;

#[cfg(not(target_arch = "wasm32"))]
#[ctor::ctor]
fn install_crypto_provider() {
    // Errors only when another provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

uniffi::setup_scaffolding!("oraclekit_core");
