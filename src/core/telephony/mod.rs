//! Telephony provider abstraction.
//!
//! One normalized call model ([`base`]), one error taxonomy ([`error`]), and
//! one adapter per vendor. The set of vendors is sealed at compile time and
//! selected once at startup into a [`ProviderSet`]; nothing dispatches on
//! vendor strings in the hot path.

pub mod base;
pub mod error;
pub mod media;
pub mod telnyx;
pub mod twilio;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use base::{
    AmdConfig, AmdResult, BaseTelephony, BoxedTelephony, CallEvent, CallEventType, CallStatus,
    EndOutcome, EndReason, HealthCheckOutcome, InitiateOptions, InitiateOutcome, RawWebhook,
    Recording, RecordingAuthMethod, RecordingRef, RecordingStatus, StatusSnapshot,
    normalize_amd_confidence,
};
pub use error::{ErrorDetails, TaxonomyKind, TelephonyError, TelephonyResult};
pub use media::{
    MediaFormat, MediaStreamMessage, MediaTrack, outbound_clear_frame, outbound_media_frame,
    parse_media_message,
};
pub use telnyx::{TelnyxConfig, TelnyxTelephony};
pub use twilio::{TwilioConfig, TwilioTelephony};

/// Supported telephony vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelephonyProvider {
    /// Twilio Voice (REST + form webhooks + media streams)
    Twilio,
    /// Telnyx Call Control v2 (REST + JSON webhooks + media streams)
    Telnyx,
}

impl std::fmt::Display for TelephonyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelephonyProvider::Twilio => write!(f, "twilio"),
            TelephonyProvider::Telnyx => write!(f, "telnyx"),
        }
    }
}

impl std::str::FromStr for TelephonyProvider {
    type Err = TelephonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twilio" => Ok(TelephonyProvider::Twilio),
            "telnyx" => Ok(TelephonyProvider::Telnyx),
            _ => Err(TelephonyError::configuration(format!(
                "Unsupported telephony provider: {s}. Supported providers: twilio, telnyx"
            ))),
        }
    }
}

/// Per-vendor adapter configuration, matched to its adapter by the factory.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Twilio(TwilioConfig),
    Telnyx(TelnyxConfig),
}

impl ProviderConfig {
    pub fn provider(&self) -> TelephonyProvider {
        match self {
            ProviderConfig::Twilio(_) => TelephonyProvider::Twilio,
            ProviderConfig::Telnyx(_) => TelephonyProvider::Telnyx,
        }
    }
}

/// Factory: build one adapter from its configuration.
pub fn create_telephony_provider(
    config: ProviderConfig,
) -> TelephonyResult<Arc<dyn BaseTelephony>> {
    match config {
        ProviderConfig::Twilio(c) => Ok(Arc::new(TwilioTelephony::new(c)?)),
        ProviderConfig::Telnyx(c) => Ok(Arc::new(TelnyxTelephony::new(c)?)),
    }
}

/// List of supported vendor names.
pub fn get_supported_telephony_providers() -> Vec<&'static str> {
    vec!["twilio", "telnyx"]
}

/// The vendors this process was started with.
///
/// Built once from configuration and shared by reference; lookup is an enum
/// key, not a string.
#[derive(Default)]
pub struct ProviderSet {
    inner: HashMap<TelephonyProvider, Arc<dyn BaseTelephony>>,
}

impl ProviderSet {
    pub fn new(configs: Vec<ProviderConfig>) -> TelephonyResult<Self> {
        let mut inner = HashMap::new();
        for config in configs {
            let provider = config.provider();
            inner.insert(provider, create_telephony_provider(config)?);
        }
        if inner.is_empty() {
            return Err(TelephonyError::configuration(
                "At least one telephony provider must be configured",
            ));
        }
        Ok(Self { inner })
    }

    /// Build from already-constructed adapters (used by tests with fakes).
    pub fn from_adapters(adapters: Vec<Arc<dyn BaseTelephony>>) -> Self {
        let inner = adapters
            .into_iter()
            .map(|adapter| (adapter.provider(), adapter))
            .collect();
        Self { inner }
    }

    pub fn get(&self, provider: TelephonyProvider) -> Option<Arc<dyn BaseTelephony>> {
        self.inner.get(&provider).cloned()
    }

    pub fn providers(&self) -> Vec<TelephonyProvider> {
        self.inner.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TelephonyProvider, &Arc<dyn BaseTelephony>)> {
        self.inner.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
