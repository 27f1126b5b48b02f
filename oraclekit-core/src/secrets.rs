//! Per-stage API secrets, released by the service to authorized devices.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::Stage;
use crate::error::OracleKitError;
use crate::http_request::Request;
use crate::identity::DeviceIdentity;
use crate::storage::SecureStore;

/// Secrets the service hands out for one stage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct StageSecrets {
    /// API key for the chain indexer.
    pub blockfrost_api_key: String,
}

impl std::fmt::Debug for StageSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSecrets")
            .field("blockfrost_api_key", &"[REDACTED]")
            .finish()
    }
}

/// Secure-namespace entry for `stage`.
#[must_use]
pub fn secrets_entry(stage: Stage) -> String {
    format!("secrets/{stage}")
}

/// Requests the secrets for `stage` and stores them encrypted.
///
/// Any previously stored secrets for the stage are cleared first, so a
/// rejected request leaves the device unauthorized for it. Returns whether the
/// device is now authorized. A 4xx status is the service's answer and yields
/// `Ok(false)`; a 5xx status is a service failure and yields
/// [`OracleKitError::HttpError`].
pub(crate) async fn authorize_stage(
    request: &Request,
    identity: &DeviceIdentity,
    store: &SecureStore,
    clock: &dyn Clock,
    stage: Stage,
    base_url: &str,
) -> Result<bool, OracleKitError> {
    let entry = secrets_entry(stage);
    store.delete(&entry)?;

    if !identity.has_wallet()? {
        log::info!("no signing key yet, skipping authorization for {stage}");
        return Ok(false);
    }

    let token = identity.mint_token(clock.now_millis())?;
    let url = format!("{}/secrets", base_url.trim_end_matches('/'));
    let reply = request.get_authorized_with_retry(&url, &token).await?;
    if reply.status >= 500 {
        return Err(OracleKitError::HttpError {
            status: reply.status,
            body: reply.body,
        });
    }
    if !reply.is_success() {
        log::warn!("device not authorized for {stage}: status {}", reply.status);
        return Ok(false);
    }

    let secrets: StageSecrets =
        serde_json::from_str(&reply.body).map_err(|err| OracleKitError::InvalidInput {
            attribute: "secrets".to_string(),
            reason: err.to_string(),
        })?;
    let json = serde_json::to_vec(&secrets).map_err(|err| OracleKitError::EncodingFailed {
        message: err.to_string(),
    })?;
    store.put(&entry, &json)?;
    log::info!("device authorized for {stage}");
    Ok(true)
}

/// Reads the stored secrets for `stage`.
///
/// # Errors
///
/// Returns [`OracleKitError::DecryptionFailed`] if the record is unreadable.
pub fn stored_secrets(
    store: &SecureStore,
    stage: Stage,
) -> Result<Option<StageSecrets>, OracleKitError> {
    let entry = secrets_entry(stage);
    let Some(json) = store.get(&entry)? else {
        return Ok(None);
    };
    serde_json::from_slice(&json)
        .map(Some)
        .map_err(|err| OracleKitError::DecryptionFailed {
            key: entry,
            reason: format!("stored secrets are not valid JSON: {err}"),
        })
}

/// Stages for which secrets are currently stored.
///
/// # Errors
///
/// Returns a storage error if the store cannot be read.
pub fn authorized_stages(store: &SecureStore) -> Result<Vec<Stage>, OracleKitError> {
    let mut stages = Vec::new();
    for stage in Stage::ALL {
        if store.contains(&secrets_entry(stage))? {
            stages.push(stage);
        }
    }
    Ok(stages)
}
