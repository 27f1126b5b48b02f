//! The client context exported to the host application.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::{OracleConfig, Stage};
use crate::engine::{EngineState, PollContext, PollingEngine, LAST_SYNC_ENTRY, RESULT_ENTRY};
use crate::error::OracleKitError;
use crate::http_request::Request;
use crate::identity::{DeviceIdSource, DeviceIdentity, GeneratedWallet, WalletGenerator};
use crate::secrets::{self, StageSecrets};
use crate::status::{StatusChannel, StatusListener};
use crate::storage::{DeviceKeystore, KeyValueStore, SecureStore};

/// Library version reported to the host through [`StatusListener::on_sdk_version`].
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Device identity, encrypted storage and background polling for one app.
///
/// Construct one per process and keep it alive for as long as polling should
/// run. Initialization order is store, then identity, then engine; a storage
/// failure at construction is the only fatal error.
///
/// # Example (Kotlin)
///
/// ```kotlin
/// val client = OracleClient(OracleConfig.default(), kvStore, keystore, wallets, ids)
/// client.setStatusListener(listener)
/// client.start()
/// ```
#[derive(uniffi::Object)]
pub struct OracleClient {
    config: OracleConfig,
    store: Arc<SecureStore>,
    identity: Arc<DeviceIdentity>,
    status: Arc<StatusChannel>,
    request: Arc<Request>,
    clock: Arc<dyn Clock>,
    engine: PollingEngine,
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleClient")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[uniffi::export(async_runtime = "tokio")]
impl OracleClient {
    /// Opens the client on top of the host's storage and keystore.
    ///
    /// # Errors
    ///
    /// Returns [`OracleKitError::InvalidInput`] for an invalid configuration and
    /// [`OracleKitError::StorageUnavailable`] if the secure store cannot be
    /// opened.
    #[uniffi::constructor]
    pub fn new(
        config: OracleConfig,
        kv: Arc<dyn KeyValueStore>,
        keystore: Arc<dyn DeviceKeystore>,
        wallets: Arc<dyn WalletGenerator>,
        id_source: Arc<dyn DeviceIdSource>,
    ) -> Result<Arc<Self>, OracleKitError> {
        Self::with_clock(
            config,
            kv,
            keystore,
            wallets,
            id_source,
            Arc::new(SystemClock),
        )
        .map(Arc::new)
    }

    /// Installs or clears the listener notified of status changes.
    pub fn set_status_listener(&self, listener: Option<Arc<dyn StatusListener>>) {
        self.status.set_listener(listener);
    }

    /// Loads the device keypair, generating one on first use.
    ///
    /// # Errors
    ///
    /// See [`DeviceIdentity::ensure_loaded`].
    pub fn ensure_identity(&self) -> Result<(), OracleKitError> {
        self.identity.ensure_loaded()
    }

    /// Whether a signing key has been stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be read.
    pub fn has_wallet(&self) -> Result<bool, OracleKitError> {
        self.identity.has_wallet()
    }

    /// Replaces the device keypair.
    ///
    /// # Errors
    ///
    /// See [`DeviceIdentity::replace`].
    pub fn replace_wallet(&self, wallet: GeneratedWallet) -> Result<(), OracleKitError> {
        self.identity.replace(&wallet)
    }

    /// The device's Ed25519 public key.
    ///
    /// # Errors
    ///
    /// See [`DeviceIdentity::ensure_loaded`].
    pub fn public_key(&self) -> Result<Vec<u8>, OracleKitError> {
        self.identity.public_key()
    }

    /// The wallet mnemonic, for backup confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`OracleKitError::DecryptionFailed`] if the record is unreadable.
    pub fn mnemonic(&self) -> Result<Option<String>, OracleKitError> {
        Ok(self.identity.mnemonic()?.map(|phrase| String::clone(&phrase)))
    }

    /// The stable device identifier.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the id cannot be read or persisted.
    pub fn device_id(&self) -> Result<u32, OracleKitError> {
        self.identity.device_id()
    }

    /// Mints a fresh hex authentication token.
    ///
    /// # Errors
    ///
    /// See [`DeviceIdentity::mint_token`].
    pub fn mint_token(&self) -> Result<String, OracleKitError> {
        self.identity.mint_token(self.clock.now_millis())
    }

    /// Starts background polling. Starting a running engine is a no-op and
    /// returns `false`.
    ///
    /// # Errors
    ///
    /// Fails if the device identity cannot be loaded; the engine then stays
    /// stopped.
    pub async fn start(&self) -> Result<bool, OracleKitError> {
        if let Err(err) = self.identity.ensure_loaded() {
            log::error!("cannot start polling: {err}");
            return Err(err);
        }
        let started = self.engine.start()?;
        if started {
            self.status.sdk_version(SDK_VERSION);
            self.status.info("Service started");
        }
        Ok(started)
    }

    /// Requests the background task to stop. See [`PollingEngine::stop`].
    pub fn stop(&self) {
        self.engine.stop();
    }

    /// Resolves once the background task has exited.
    pub async fn stopped(&self) {
        self.engine.stopped().await;
    }

    /// Current engine state.
    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    /// Runs one poll now and returns the published result.
    pub async fn poll_once(&self) -> String {
        self.engine.poll_once().await
    }

    /// The most recent poll result, from memory or from the previous session.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the persisted result cannot be read.
    pub fn latest_status(&self) -> Result<Option<String>, OracleKitError> {
        match self.status.latest() {
            Some(result) => Ok(Some(result)),
            None => Ok(self.store.get_raw(RESULT_ENTRY)?),
        }
    }

    /// Epoch millis of the last poll that returned a success status.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the value cannot be read.
    pub fn last_sync(&self) -> Result<Option<u64>, OracleKitError> {
        Ok(self
            .store
            .get_raw(LAST_SYNC_ENTRY)?
            .and_then(|millis| millis.parse().ok()))
    }

    /// Requests the secrets for `stage`. Returns whether the device is
    /// authorized for it.
    ///
    /// # Errors
    ///
    /// Returns network errors, [`OracleKitError::HttpError`] for a 5xx
    /// status, or storage and identity errors.
    pub async fn authorize_stage(&self, stage: Stage) -> Result<bool, OracleKitError> {
        let base_url = if stage == self.config.stage {
            self.config.stage_url().to_string()
        } else {
            stage.base_url().to_string()
        };
        secrets::authorize_stage(
            &self.request,
            &self.identity,
            &self.store,
            self.clock.as_ref(),
            stage,
            &base_url,
        )
        .await
    }

    /// Re-authorizes every stage, logging per-stage failures, and returns the
    /// stages the device is authorized for afterwards.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the result cannot be read back.
    pub async fn authorize_all_stages(&self) -> Result<Vec<Stage>, OracleKitError> {
        for stage in Stage::ALL {
            if let Err(err) = self.authorize_stage(stage).await {
                log::warn!("authorization for {stage} failed: {err}");
            }
        }
        self.authorized_stages()
    }

    /// Stages for which secrets are stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be read.
    pub fn authorized_stages(&self) -> Result<Vec<Stage>, OracleKitError> {
        secrets::authorized_stages(&self.store)
    }

    /// The stored secrets for `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`OracleKitError::DecryptionFailed`] if the record is unreadable.
    pub fn stage_secrets(&self, stage: Stage) -> Result<Option<StageSecrets>, OracleKitError> {
        secrets::stored_secrets(&self.store, stage)
    }

    /// Regenerates the storage master key. Every stored secret, including the
    /// signing key, becomes unreadable.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the new key cannot be persisted.
    pub fn rotate_master_key(&self) -> Result<(), OracleKitError> {
        Ok(self.store.rotate_master_key()?)
    }
}

impl OracleClient {
    /// Like [`OracleClient::new`], with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`OracleClient::new`].
    pub fn with_clock(
        config: OracleConfig,
        kv: Arc<dyn KeyValueStore>,
        keystore: Arc<dyn DeviceKeystore>,
        wallets: Arc<dyn WalletGenerator>,
        id_source: Arc<dyn DeviceIdSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, OracleKitError> {
        config.validate()?;
        let store = match SecureStore::open(kv, keystore) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                log::error!("secure store initialization failed: {err}");
                return Err(err.into());
            }
        };
        let identity = Arc::new(DeviceIdentity::new(Arc::clone(&store), wallets, id_source));
        let status = Arc::new(StatusChannel::new());
        let request = Arc::new(Request::new(&config)?);
        let engine = PollingEngine::new(PollContext {
            request: Arc::clone(&request),
            identity: Arc::clone(&identity),
            store: Arc::clone(&store),
            status: Arc::clone(&status),
            clock: Arc::clone(&clock),
            endpoint: config.endpoint.clone(),
            interval: config.poll_interval(),
        });

        Ok(Self {
            config,
            store,
            identity,
            status,
            request,
            clock,
            engine,
        })
    }

    /// The status slot, for in-process subscribers.
    #[must_use]
    pub fn status(&self) -> &StatusChannel {
        &self.status
    }

    /// The underlying secure store.
    #[must_use]
    pub fn store(&self) -> &SecureStore {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &OracleConfig {
        &self.config
    }
}
