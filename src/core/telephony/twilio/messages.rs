//! Twilio REST and webhook message types.
//!
//! Twilio speaks form-encoded webhooks and JSON REST responses; the mapping
//! tables here translate its vocabulary into the normalized call model.

use phf::phf_map;
use serde::Deserialize;

use crate::core::telephony::base::{AmdResult, CallStatus};
use crate::core::telephony::error::TaxonomyKind;

/// Call resource as returned by `POST /Calls.json` and `GET /Calls/{sid}.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TwilioCallResource {
    pub sid: String,
    pub status: String,
    /// Twilio reports duration as a decimal string
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub answered_by: Option<String>,
}

/// Recording resource as returned by the recordings API.
#[derive(Debug, Clone, Deserialize)]
pub struct TwilioRecordingResource {
    pub sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Error body Twilio attaches to non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct TwilioErrorBody {
    #[serde(default)]
    pub code: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

/// Twilio call status vocabulary.
pub static CALL_STATUS_TABLE: phf::Map<&'static str, CallStatus> = phf_map! {
    "queued" => CallStatus::Queued,
    "initiated" => CallStatus::Initiated,
    "ringing" => CallStatus::Ringing,
    "in-progress" => CallStatus::InProgress,
    "completed" => CallStatus::Completed,
    "busy" => CallStatus::Busy,
    "no-answer" => CallStatus::NoAnswer,
    "failed" => CallStatus::Failed,
    "canceled" => CallStatus::Cancelled,
};

/// Twilio `AnsweredBy` vocabulary from machine detection.
pub static ANSWERED_BY_TABLE: phf::Map<&'static str, AmdResult> = phf_map! {
    "human" => AmdResult::Human,
    "machine_start" => AmdResult::Machine,
    "machine_end_beep" => AmdResult::Machine,
    "machine_end_silence" => AmdResult::Machine,
    "machine_end_other" => AmdResult::Machine,
    "fax" => AmdResult::Fax,
    "unknown" => AmdResult::Unknown,
};

/// Twilio error codes that carry more information than the HTTP status.
pub static ERROR_CODE_TABLE: phf::Map<u32, TaxonomyKind> = phf_map! {
    20003u32 => TaxonomyKind::Authentication,
    20403u32 => TaxonomyKind::PermissionDenied,
    20404u32 => TaxonomyKind::ResourceNotFound,
    20429u32 => TaxonomyKind::RateLimit,
    21211u32 => TaxonomyKind::Validation,
    21212u32 => TaxonomyKind::Validation,
    21214u32 => TaxonomyKind::Validation,
    21215u32 => TaxonomyKind::PermissionDenied,
    21216u32 => TaxonomyKind::PermissionDenied,
    21217u32 => TaxonomyKind::Validation,
    13223u32 => TaxonomyKind::Validation,
    13224u32 => TaxonomyKind::Validation,
};

/// Map a Twilio call status string, exactly.
pub fn map_call_status(raw: &str) -> Option<CallStatus> {
    CALL_STATUS_TABLE.get(raw.to_ascii_lowercase().as_str()).copied()
}

/// Map a Twilio `AnsweredBy` value, exactly.
pub fn map_answered_by(raw: &str) -> Option<AmdResult> {
    ANSWERED_BY_TABLE.get(raw.to_ascii_lowercase().as_str()).copied()
}
