//! Client configuration and deployment stages.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::OracleKitError;

/// Default polling endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.token.pbg.io/token/supply";

/// Deployment stage of the oracle service.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
    uniffi::Enum,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Production.
    Mainnet,
    /// Pre-release service against mainnet.
    Beta,
    /// Test network.
    Preprod,
}

impl Stage {
    /// Every stage, in the order they are authorized.
    pub const ALL: [Self; 3] = [Self::Mainnet, Self::Beta, Self::Preprod];

    /// Base URL of the stage's oracle API.
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Mainnet => "https://api.oracle.token.pbg.io",
            Self::Beta => "https://api.oracle.beta.pbgtoken.io",
            Self::Preprod => "https://api.oracle.preprod.pbgtoken.io",
        }
    }
}

/// Client configuration.
///
/// Deserializes from JSON; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(default)]
pub struct OracleConfig {
    /// URL polled by the background engine.
    pub endpoint: String,
    /// Delay between the end of one poll and the start of the next.
    pub poll_interval_ms: u64,
    /// TCP/TLS connect timeout per request.
    pub connect_timeout_ms: u64,
    /// Total timeout per request, including reading the body.
    pub read_timeout_ms: u64,
    /// Retries for connect errors and timeouts of one-shot requests such as
    /// stage authorization. Polls never retry within an iteration.
    pub max_retries: u32,
    /// Stage used for authorization requests.
    pub stage: Stage,
    /// Base URL override for the stage API, mainly for tests.
    pub stage_base_url: Option<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            poll_interval_ms: 10_000,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 5_000,
            max_retries: 2,
            stage: Stage::Mainnet,
            stage_base_url: None,
        }
    }
}

impl OracleConfig {
    /// Default configuration for `stage`.
    #[must_use]
    pub fn from_stage(stage: Stage) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OracleKitError::InvalidInput`] if the JSON is malformed or a
    /// value is out of range.
    pub fn from_json(json: &str) -> Result<Self, OracleKitError> {
        let config: Self = serde_json::from_str(json).map_err(|err| OracleKitError::InvalidInput {
            attribute: "config".to_string(),
            reason: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks URLs and timing values.
    ///
    /// # Errors
    ///
    /// Returns [`OracleKitError::InvalidInput`] naming the offending field.
    pub fn validate(&self) -> Result<(), OracleKitError> {
        check_url("endpoint", &self.endpoint)?;
        if let Some(base_url) = &self.stage_base_url {
            check_url("stage_base_url", base_url)?;
        }
        for (attribute, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
        ] {
            if value == 0 {
                return Err(OracleKitError::InvalidInput {
                    attribute: attribute.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Base URL used for stage requests.
    #[must_use]
    pub fn stage_url(&self) -> &str {
        self.stage_base_url
            .as_deref()
            .unwrap_or_else(|| self.stage.base_url())
    }

    pub(crate) const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn check_url(attribute: &str, url: &str) -> Result<(), OracleKitError> {
    let invalid = |reason: String| OracleKitError::InvalidInput {
        attribute: attribute.to_string(),
        reason,
    };
    let parsed = reqwest::Url::parse(url).map_err(|err| invalid(err.to_string()))?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            log::warn!("{attribute} uses plain http, tokens will travel unencrypted");
            Ok(())
        }
        other => Err(invalid(format!("unsupported scheme `{other}`"))),
    }
}
