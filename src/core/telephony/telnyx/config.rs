//! Telnyx adapter configuration.

use crate::core::telephony::base::{AmdConfig, CallStatus};
use crate::core::telephony::error::{TelephonyError, TelephonyResult};

/// Default REST API base.
pub const TELNYX_API_BASE: &str = "https://api.telnyx.com";

/// Default bound on any single REST request.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Configuration for [`super::TelnyxTelephony`].
#[derive(Debug, Clone)]
pub struct TelnyxConfig {
    /// API key (v2, bearer auth)
    pub api_key: String,
    /// Call Control connection id outbound calls are placed through
    pub connection_id: String,
    /// REST API base URL; overridable for tests
    pub api_base: String,
    /// Bound on any single REST request, in milliseconds
    pub request_timeout_ms: u64,
    /// Status applied when a webhook carries a status we cannot map or infer
    pub default_status: CallStatus,
    /// Initial AMD settings
    pub amd: AmdConfig,
}

impl TelnyxConfig {
    pub fn new(api_key: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            connection_id: connection_id.into(),
            api_base: TELNYX_API_BASE.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            default_status: CallStatus::Queued,
            amd: AmdConfig::default(),
        }
    }

    pub fn validate(&self) -> TelephonyResult<()> {
        if self.api_key.is_empty() {
            return Err(TelephonyError::configuration("Telnyx API key is required"));
        }
        if self.connection_id.is_empty() {
            return Err(TelephonyError::configuration(
                "Telnyx connection id is required",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(TelephonyError::configuration(
                "Telnyx request timeout must be non-zero",
            ));
        }
        Ok(())
    }
}
