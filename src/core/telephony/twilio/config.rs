//! Twilio adapter configuration.

use crate::core::telephony::base::{AmdConfig, CallStatus};
use crate::core::telephony::error::{TelephonyError, TelephonyResult};

/// Default REST API base.
pub const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Default bound on any single REST request.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Configuration for [`super::TwilioTelephony`].
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    /// Account SID ("AC...")
    pub account_sid: String,
    /// API auth token
    pub auth_token: String,
    /// REST API base URL; overridable for tests
    pub api_base: String,
    /// Bound on any single REST request, in milliseconds
    pub request_timeout_ms: u64,
    /// Status applied when a webhook carries a status we cannot map or infer
    pub default_status: CallStatus,
    /// Initial AMD settings
    pub amd: AmdConfig,
}

impl TwilioConfig {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            api_base: TWILIO_API_BASE.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            default_status: CallStatus::Queued,
            amd: AmdConfig::default(),
        }
    }

    pub fn validate(&self) -> TelephonyResult<()> {
        if self.account_sid.is_empty() {
            return Err(TelephonyError::configuration("Twilio account SID is required"));
        }
        if self.auth_token.is_empty() {
            return Err(TelephonyError::configuration("Twilio auth token is required"));
        }
        if self.request_timeout_ms == 0 {
            return Err(TelephonyError::configuration(
                "Twilio request timeout must be non-zero",
            ));
        }
        Ok(())
    }
}
