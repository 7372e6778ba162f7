//! Base traits and types for telephony providers.
//!
//! This module defines the vendor-neutral call model: statuses, lifecycle
//! events, AMD results, recordings, and the `BaseTelephony` trait every
//! vendor adapter implements. Vendor vocabularies are normalized here once;
//! everything above this layer (bridge, scheduler, orchestrator) speaks only
//! these types.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TelephonyProvider;
use super::error::TelephonyError;

// =============================================================================
// Call Status
// =============================================================================

/// Normalized call status across all telephony vendors.
///
/// Every vendor status string maps into exactly one of these values. The
/// predicates below partition the enum into three lifecycle groups:
/// pre-answer, active, and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Accepted by the vendor, not yet dialing
    Queued,
    /// Dialing has started
    Initiated,
    /// Remote end is ringing
    Ringing,
    /// Call was answered and audio is flowing
    InProgress,
    /// Call ended normally after being answered
    Completed,
    /// Call could not be completed
    Failed,
    /// Remote end was busy
    Busy,
    /// Remote end never answered
    NoAnswer,
    /// Answered by voicemail / answering machine
    Voicemail,
    /// Cancelled before the remote end answered
    Cancelled,
}

impl CallStatus {
    /// Terminal statuses: no further transitions occur after these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Failed
                | CallStatus::Busy
                | CallStatus::NoAnswer
                | CallStatus::Voicemail
                | CallStatus::Cancelled
        )
    }

    /// The single active (answered, audio flowing) status.
    pub fn is_active(self) -> bool {
        matches!(self, CallStatus::InProgress)
    }

    /// Pre-answer statuses: the call exists but nobody has picked up.
    pub fn is_ringing(self) -> bool {
        matches!(
            self,
            CallStatus::Queued | CallStatus::Initiated | CallStatus::Ringing
        )
    }

    /// Terminal statuses that did not reach a completed conversation.
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            CallStatus::Failed | CallStatus::Busy | CallStatus::NoAnswer | CallStatus::Cancelled
        )
    }

    /// Infer a status from an unrecognized vendor string by substring match.
    ///
    /// Returns `None` when no pattern applies; callers fall back to their
    /// configured default status. Never errors: unknown vendor vocabulary
    /// must not break event processing.
    pub fn infer(raw: &str) -> Option<CallStatus> {
        let s = raw.to_ascii_lowercase();
        // Negative answer patterns must be checked before "answer".
        if s.contains("no-answer") || s.contains("no_answer") || s.contains("noanswer") {
            return Some(CallStatus::NoAnswer);
        }
        if s.contains("busy") {
            return Some(CallStatus::Busy);
        }
        if s.contains("voicemail") || s.contains("machine") {
            return Some(CallStatus::Voicemail);
        }
        if s.contains("cancel") {
            return Some(CallStatus::Cancelled);
        }
        if s.contains("fail") || s.contains("error") || s.contains("reject") {
            return Some(CallStatus::Failed);
        }
        if s.contains("complet") || s.contains("hangup") || s.contains("ended") {
            return Some(CallStatus::Completed);
        }
        if s.contains("progress") || s.contains("answer") || s.contains("bridged") {
            return Some(CallStatus::InProgress);
        }
        if s.contains("ring") {
            return Some(CallStatus::Ringing);
        }
        if s.contains("queue") {
            return Some(CallStatus::Queued);
        }
        if s.contains("init") || s.contains("dial") {
            return Some(CallStatus::Initiated);
        }
        None
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallStatus::Queued => "queued",
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in_progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no_answer",
            CallStatus::Voicemail => "voicemail",
            CallStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// AMD (Answering Machine Detection)
// =============================================================================

/// Normalized answering-machine-detection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmdResult {
    Human,
    Machine,
    Fax,
    Unknown,
}

impl fmt::Display for AmdResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AmdResult::Human => "human",
            AmdResult::Machine => "machine",
            AmdResult::Fax => "fax",
            AmdResult::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Normalize an AMD confidence value to `[0, 1]`.
///
/// Vendors report confidence on different scales: some as a fraction, some
/// as a percentage. Values already in `[0, 1]` are kept; values in
/// `(1, 100]` are treated as percentages; the final result is clamped.
pub fn normalize_amd_confidence(raw: f64) -> f64 {
    let value = if raw > 1.0 && raw <= 100.0 {
        raw / 100.0
    } else {
        raw
    };
    value.clamp(0.0, 1.0)
}

/// Answering-machine-detection configuration passed to vendors at initiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmdConfig {
    /// Whether AMD is requested at all
    pub enabled: bool,
    /// Wait for the end of a machine greeting before reporting (beep detection)
    pub detect_message_end: bool,
    /// Maximum time the vendor may spend deciding, in milliseconds
    pub timeout_ms: u64,
}

impl Default for AmdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detect_message_end: false,
            timeout_ms: 30_000,
        }
    }
}

// =============================================================================
// Call Events
// =============================================================================

/// Category of a normalized lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEventType {
    /// Status transition (queued, ringing, answered, hangup, ...)
    Status,
    /// AMD classification result
    Amd,
    /// A recording became available
    Recording,
    /// Unrecognized vendor event, carried for the audit log
    Unknown,
}

/// One normalized call lifecycle event, produced by a vendor adapter from a
/// single webhook delivery and consumed exactly once by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    /// Unique id for this event (vendor id when present, otherwise generated)
    pub event_id: String,
    /// The vendor that produced the event
    pub provider: TelephonyProvider,
    /// Vendor's id for the call this event belongs to
    pub provider_call_id: String,
    pub event_type: CallEventType,
    pub status: CallStatus,
    pub timestamp: DateTime<Utc>,
    /// Vendor hangup cause, verbatim, when the event carries one
    pub hangup_reason: Option<String>,
    pub amd_result: Option<AmdResult>,
    /// Normalized to `[0, 1]`
    pub amd_confidence: Option<f64>,
    pub recording: Option<Recording>,
    pub duration_secs: Option<u64>,
}

// =============================================================================
// Recordings
// =============================================================================

/// Processing state of a call recording on the vendor side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Processing,
    Ready,
    Failed,
    Expired,
}

/// How a recording URL must be authenticated when fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingAuthMethod {
    None,
    BasicAuth,
    BearerToken,
}

/// A call recording reference, normalized across vendors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub call_id: String,
    pub url: String,
    /// Audio container format, e.g. "wav" or "mp3"
    pub format: String,
    pub duration_secs: Option<u64>,
    pub size_bytes: Option<u64>,
    pub status: RecordingStatus,
    pub provider: TelephonyProvider,
    pub requires_auth: bool,
    pub auth_method: RecordingAuthMethod,
}

/// Input accepted by [`BaseTelephony::get_recording`].
///
/// Adapters must handle both a raw vendor webhook payload and a previously
/// stored URL string; a `Recording` produced from a payload can be re-derived
/// later from its `url` field alone.
#[derive(Debug, Clone)]
pub enum RecordingRef {
    Payload(RawWebhook),
    Url(String),
}

// =============================================================================
// Webhook Payloads
// =============================================================================

/// A raw vendor webhook body, before normalization.
///
/// Vendors disagree even on the transport encoding: some deliver
/// form-encoded key/value pairs, others nested JSON. Adapters receive this
/// and produce [`CallEvent`]s; nothing above the adapter layer touches it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawWebhook {
    Form(HashMap<String, String>),
    Json(serde_json::Value),
}

impl RawWebhook {
    /// Look up a top-level string field by name.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self {
            RawWebhook::Form(map) => map.get(key).map(String::as_str),
            RawWebhook::Json(value) => value.get(key).and_then(|v| v.as_str()),
        }
    }

    /// Look up a string field at a dotted path, e.g. `data.payload.state`.
    /// For form payloads only the final segment is consulted.
    pub fn get_path(&self, path: &str) -> Option<&str> {
        match self {
            RawWebhook::Form(map) => {
                let last = path.rsplit('.').next()?;
                map.get(last).map(String::as_str)
            }
            RawWebhook::Json(value) => {
                let mut current = value;
                for segment in path.split('.') {
                    current = current.get(segment)?;
                }
                current.as_str()
            }
        }
    }
}

// =============================================================================
// Operation Inputs / Outcomes
// =============================================================================

/// Options for one outbound call initiation.
#[derive(Debug, Clone, Default)]
pub struct InitiateOptions {
    /// Public WebSocket URL the vendor should stream call media to
    pub stream_url: Option<String>,
    /// Public URL the vendor should deliver status webhooks to
    pub status_callback_url: Option<String>,
    /// AMD settings for this call; `None` uses the adapter's configured value
    pub amd: Option<AmdConfig>,
    /// Ring timeout in seconds before the vendor gives up
    pub timeout_secs: Option<u64>,
}

/// Successful initiation response.
#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    pub provider_call_id: String,
    pub status: CallStatus,
}

/// Successful hangup response.
#[derive(Debug, Clone)]
pub struct EndOutcome {
    pub status: CallStatus,
}

/// Why a call is being ended from our side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Conversation ran to completion
    Normal,
    /// AMD classified the callee as a machine
    MachineDetected,
    /// The agent marked the lead disqualified
    Disqualified,
    /// An operator requested the hangup
    Operator,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::Normal => "normal",
            EndReason::MachineDetected => "machine_detected",
            EndReason::Disqualified => "disqualified",
            EndReason::Operator => "operator",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time status snapshot from a vendor poll.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub status: CallStatus,
    pub duration_secs: Option<u64>,
    pub amd_result: Option<AmdResult>,
}

/// Result of one health probe. Probe failures are data, not errors: the
/// scheduler's outage gating consumes these directly.
#[derive(Debug, Clone)]
pub struct HealthCheckOutcome {
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

// =============================================================================
// Base Trait
// =============================================================================

/// Unified capability interface implemented by every telephony vendor
/// adapter.
///
/// Adapters own all vendor-specific knowledge: REST shapes, status
/// vocabularies, AMD parameter names, error code tables. Network operations
/// are bounded by explicit timeouts and surface [`TelephonyError`] values,
/// never vendor exception shapes.
#[async_trait]
pub trait BaseTelephony: Send + Sync {
    /// Which vendor this adapter fronts.
    fn provider(&self) -> TelephonyProvider;

    /// Place an outbound call. Bounded by the adapter's configured timeout.
    async fn initiate_call(
        &self,
        to: &str,
        from: &str,
        options: &InitiateOptions,
    ) -> Result<InitiateOutcome, TelephonyError>;

    /// Hang up an in-flight call.
    async fn end_call(
        &self,
        provider_call_id: &str,
        reason: EndReason,
    ) -> Result<EndOutcome, TelephonyError>;

    /// Poll the vendor for the call's current status.
    async fn get_call_status(
        &self,
        provider_call_id: &str,
    ) -> Result<StatusSnapshot, TelephonyError>;

    /// Resolve a recording from either a raw webhook payload or a stored URL.
    async fn get_recording(&self, reference: RecordingRef) -> Result<Recording, TelephonyError>;

    /// Replace the adapter's AMD configuration for subsequent initiations.
    fn configure_amd(&self, config: AmdConfig);

    /// Probe vendor API reachability. Infallible: failures are reported in
    /// the outcome, not raised.
    async fn health_check(&self) -> HealthCheckOutcome;

    /// Normalize one raw webhook delivery into a [`CallEvent`].
    ///
    /// Deterministic and pure: no I/O, no clock reads beyond defaulting a
    /// missing timestamp. Unknown vendor status strings fall back to
    /// substring inference and then the adapter's configured default status,
    /// with a warning log, never an error.
    fn map_event(&self, raw: &RawWebhook) -> CallEvent;
}

/// Boxed trait object for telephony adapters.
pub type BoxedTelephony = Box<dyn BaseTelephony>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates_partition_enum() {
        let all = [
            CallStatus::Queued,
            CallStatus::Initiated,
            CallStatus::Ringing,
            CallStatus::InProgress,
            CallStatus::Completed,
            CallStatus::Failed,
            CallStatus::Busy,
            CallStatus::NoAnswer,
            CallStatus::Voicemail,
            CallStatus::Cancelled,
        ];
        for status in all {
            let groups = [status.is_ringing(), status.is_active(), status.is_terminal()];
            assert_eq!(
                groups.iter().filter(|g| **g).count(),
                1,
                "{status} must fall into exactly one lifecycle group"
            );
        }
    }

    #[test]
    fn test_failed_is_subset_of_terminal() {
        let all = [
            CallStatus::Queued,
            CallStatus::Initiated,
            CallStatus::Ringing,
            CallStatus::InProgress,
            CallStatus::Completed,
            CallStatus::Failed,
            CallStatus::Busy,
            CallStatus::NoAnswer,
            CallStatus::Voicemail,
            CallStatus::Cancelled,
        ];
        for status in all {
            if status.is_failed() {
                assert!(status.is_terminal());
            }
        }
    }

    #[test]
    fn test_status_inference() {
        assert_eq!(CallStatus::infer("user-busy"), Some(CallStatus::Busy));
        assert_eq!(CallStatus::infer("ringing_now"), Some(CallStatus::Ringing));
        assert_eq!(CallStatus::infer("call-failed"), Some(CallStatus::Failed));
        assert_eq!(CallStatus::infer("canceled"), Some(CallStatus::Cancelled));
        assert_eq!(
            CallStatus::infer("in-progress"),
            Some(CallStatus::InProgress)
        );
        assert_eq!(CallStatus::infer("no-answer"), Some(CallStatus::NoAnswer));
        assert_eq!(
            CallStatus::infer("machine_detected"),
            Some(CallStatus::Voicemail)
        );
        assert_eq!(CallStatus::infer("total-gibberish"), None);
    }

    #[test]
    fn test_inference_checks_no_answer_before_answer() {
        // "no_answer" contains "answer"; the negative pattern must win.
        assert_eq!(CallStatus::infer("no_answer"), Some(CallStatus::NoAnswer));
        assert_eq!(CallStatus::infer("answered"), Some(CallStatus::InProgress));
    }

    #[test]
    fn test_amd_confidence_normalization() {
        assert_eq!(normalize_amd_confidence(85.0), 0.85);
        assert_eq!(normalize_amd_confidence(150.0), 1.0);
        assert_eq!(normalize_amd_confidence(-0.5), 0.0);
        assert_eq!(normalize_amd_confidence(0.42), 0.42);
        assert_eq!(normalize_amd_confidence(1.0), 1.0);
        assert_eq!(normalize_amd_confidence(0.0), 0.0);
    }

    #[test]
    fn test_raw_webhook_accessors() {
        let mut map = HashMap::new();
        map.insert("CallStatus".to_string(), "ringing".to_string());
        let form = RawWebhook::Form(map);
        assert_eq!(form.get("CallStatus"), Some("ringing"));
        assert_eq!(form.get_path("data.CallStatus"), Some("ringing"));

        let json = RawWebhook::Json(serde_json::json!({
            "data": { "payload": { "state": "answered" } }
        }));
        assert_eq!(json.get_path("data.payload.state"), Some("answered"));
        assert_eq!(json.get_path("data.payload.missing"), None);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(CallStatus::InProgress.to_string(), "in_progress");
        assert_eq!(CallStatus::NoAnswer.to_string(), "no_answer");
    }
}
