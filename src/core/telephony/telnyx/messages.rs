//! Telnyx REST and webhook message types.
//!
//! Telnyx speaks JSON everywhere: REST bodies under `data`, webhooks as
//! `{data: {event_type, payload}}` envelopes. The tables here translate its
//! event and hangup-cause vocabulary into the normalized call model.

use phf::phf_map;
use serde::Deserialize;

use crate::core::telephony::base::{AmdResult, CallStatus};
use crate::core::telephony::error::TaxonomyKind;

/// Call resource under `data` in Call Control responses.
#[derive(Debug, Clone, Deserialize)]
pub struct TelnyxCallData {
    pub call_control_id: String,
    #[serde(default)]
    pub call_leg_id: Option<String>,
    #[serde(default)]
    pub call_session_id: Option<String>,
    #[serde(default)]
    pub is_alive: Option<bool>,
}

/// Envelope for single-resource responses.
#[derive(Debug, Clone, Deserialize)]
pub struct TelnyxEnvelope<T> {
    pub data: T,
}

/// One entry in a Telnyx error response.
#[derive(Debug, Clone, Deserialize)]
pub struct TelnyxApiError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Error body Telnyx attaches to non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct TelnyxErrorBody {
    #[serde(default)]
    pub errors: Vec<TelnyxApiError>,
}

/// Lifecycle statuses implied by Telnyx Call Control event types.
pub static EVENT_TYPE_TABLE: phf::Map<&'static str, CallStatus> = phf_map! {
    "call.initiated" => CallStatus::Initiated,
    "call.ringing" => CallStatus::Ringing,
    "call.answered" => CallStatus::InProgress,
    "call.bridged" => CallStatus::InProgress,
    "call.hangup" => CallStatus::Completed,
    "call.machine.detection.ended" => CallStatus::InProgress,
    "call.machine.greeting.ended" => CallStatus::InProgress,
    "call.recording.saved" => CallStatus::Completed,
};

/// Telnyx hangup causes. Applied on `call.hangup` to refine the terminal
/// status beyond a bare "completed".
pub static HANGUP_CAUSE_TABLE: phf::Map<&'static str, CallStatus> = phf_map! {
    "normal_clearing" => CallStatus::Completed,
    "user_busy" => CallStatus::Busy,
    "no_answer" => CallStatus::NoAnswer,
    "timeout" => CallStatus::NoAnswer,
    "originator_cancel" => CallStatus::Cancelled,
    "call_rejected" => CallStatus::Failed,
    "unspecified" => CallStatus::Failed,
};

/// Telnyx answering-machine-detection result vocabulary.
pub static AMD_RESULT_TABLE: phf::Map<&'static str, AmdResult> = phf_map! {
    "human" => AmdResult::Human,
    "machine" => AmdResult::Machine,
    "fax" => AmdResult::Fax,
    "not_sure" => AmdResult::Unknown,
};

/// Classify a Telnyx error by title keywords when the HTTP status alone is
/// ambiguous. Returns `None` to defer to status classification.
pub fn classify_error_title(title: &str) -> Option<TaxonomyKind> {
    let t = title.to_ascii_lowercase();
    if t.contains("authenticat") || t.contains("token") {
        return Some(TaxonomyKind::Authentication);
    }
    if t.contains("rate") && t.contains("limit") {
        return Some(TaxonomyKind::RateLimit);
    }
    if t.contains("not found") {
        return Some(TaxonomyKind::ResourceNotFound);
    }
    if t.contains("permission") || t.contains("forbidden") {
        return Some(TaxonomyKind::PermissionDenied);
    }
    if t.contains("timeout") {
        return Some(TaxonomyKind::Timeout);
    }
    if t.contains("invalid") || t.contains("validation") {
        return Some(TaxonomyKind::Validation);
    }
    None
}

pub fn map_event_type(raw: &str) -> Option<CallStatus> {
    EVENT_TYPE_TABLE.get(raw).copied()
}

pub fn map_hangup_cause(raw: &str) -> Option<CallStatus> {
    HANGUP_CAUSE_TABLE.get(raw.to_ascii_lowercase().as_str()).copied()
}

pub fn map_amd_result(raw: &str) -> Option<AmdResult> {
    AMD_RESULT_TABLE.get(raw.to_ascii_lowercase().as_str()).copied()
}
