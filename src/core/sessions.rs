//! Call session records and the in-process store.
//!
//! A `CallSession` is the live/finished record of one actual call attempt.
//! Its status is driven exclusively by normalized [`CallEvent`]s; terminal
//! fields are first-write-wins so duplicate webhook deliveries cannot
//! double-apply a transition or re-trigger retry scheduling.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::agent::{Qualification, SpeakerRole};
use crate::core::telephony::{
    AmdResult, CallEvent, CallEventType, CallStatus, Recording, TelephonyProvider,
};

// =============================================================================
// Leads
// =============================================================================

/// Snapshot of the lead a call attempt targets. Leads are owned elsewhere;
/// this is the slice we need for dialing and template substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadProfile {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub property_address: Option<String>,
    /// Ordered dial targets in E.164
    pub phone_numbers: Vec<String>,
    /// IANA timezone name, resolved once at ingestion
    pub timezone: String,
}

// =============================================================================
// Call Sessions
// =============================================================================

/// One line of conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub role: SpeakerRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// The record of one call attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub call_id: Uuid,
    pub provider_call_id: String,
    pub provider: TelephonyProvider,
    pub lead_id: String,
    pub status: CallStatus,
    pub phone_index_used: usize,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
    /// Final human-meaningful outcome label; set at most once
    pub disposition: Option<String>,
    pub amd_result: Option<AmdResult>,
    pub amd_confidence: Option<f64>,
    pub hangup_reason: Option<String>,
    pub recording: Option<Recording>,
    pub transcript: Vec<TranscriptLine>,
    pub qualification: Option<Qualification>,
}

impl CallSession {
    pub fn new(
        provider: TelephonyProvider,
        provider_call_id: String,
        lead_id: String,
        phone_index_used: usize,
        attempt_number: u32,
        status: CallStatus,
    ) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            provider_call_id,
            provider,
            lead_id,
            status,
            phone_index_used,
            attempt_number,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            duration_secs: None,
            disposition: None,
            amd_result: None,
            amd_confidence: None,
            hangup_reason: None,
            recording: None,
            transcript: Vec::new(),
            qualification: None,
        }
    }

    /// Set the disposition if none has been recorded yet. First write wins.
    pub fn set_disposition_once(&mut self, disposition: impl Into<String>) -> bool {
        if self.disposition.is_none() {
            self.disposition = Some(disposition.into());
            true
        } else {
            false
        }
    }
}

/// What applying an event did to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// The event changed the session
    pub applied: bool,
    /// This event moved the session into a terminal status for the first
    /// time; retry scheduling keys off this exactly-once signal
    pub became_terminal: bool,
}

// =============================================================================
// Audit Records
// =============================================================================

/// One webhook delivery, as received and resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAuditRecord {
    pub provider: TelephonyProvider,
    pub event_id: String,
    pub provider_call_id: String,
    pub event_type: CallEventType,
    pub status: CallStatus,
    pub received_at: DateTime<Utc>,
    /// How ingestion resolved the event: "applied", "duplicate", "unmatched"
    pub outcome: String,
}

/// One provider health probe result or gating action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEventRecord {
    pub provider: TelephonyProvider,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub consecutive_failures: u32,
    /// Gating action taken on this probe, when any: "paused", "resumed"
    pub action: Option<String>,
    pub at: DateTime<Utc>,
}

// =============================================================================
// Store
// =============================================================================

/// In-process store for sessions, leads, and audit logs.
///
/// Sessions are indexed both by our call id and by the vendor's call id;
/// webhook ingestion uses the latter and treats a missing entry as a benign
/// no-op (events can legally arrive before the association is recorded).
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, CallSession>,
    provider_index: DashMap<String, Uuid>,
    leads: DashMap<String, LeadProfile>,
    webhook_audit: Mutex<Vec<WebhookAuditRecord>>,
    health_events: Mutex<Vec<HealthEventRecord>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_lead(&self, lead: LeadProfile) {
        self.leads.insert(lead.id.clone(), lead);
    }

    pub fn lead(&self, lead_id: &str) -> Option<LeadProfile> {
        self.leads.get(lead_id).map(|l| l.clone())
    }

    /// Record a freshly initiated call.
    pub fn insert_session(&self, session: CallSession) -> Uuid {
        let call_id = session.call_id;
        self.provider_index
            .insert(session.provider_call_id.clone(), call_id);
        self.sessions.insert(call_id, session);
        call_id
    }

    pub fn session(&self, call_id: &Uuid) -> Option<CallSession> {
        self.sessions.get(call_id).map(|s| s.clone())
    }

    pub fn session_by_provider_id(&self, provider_call_id: &str) -> Option<CallSession> {
        let call_id = self.provider_index.get(provider_call_id)?;
        self.sessions.get(&call_id).map(|s| s.clone())
    }

    /// Apply one normalized event to the session it belongs to.
    ///
    /// Returns `None` when no session matches the vendor call id. Status
    /// transitions stop at the first terminal status; later status events
    /// (including duplicates of the terminal one) only fill still-empty
    /// fields such as the recording.
    pub fn apply_event(&self, event: &CallEvent) -> Option<(Uuid, TransitionOutcome)> {
        let call_id = *self.provider_index.get(&event.provider_call_id)?;
        let mut session = self.sessions.get_mut(&call_id)?;

        let mut applied = false;
        let mut became_terminal = false;
        let was_terminal = session.status.is_terminal();

        if !was_terminal && session.status != event.status {
            session.status = event.status;
            applied = true;

            if event.status.is_active() && session.answered_at.is_none() {
                session.answered_at = Some(event.timestamp);
            }
            if event.status.is_terminal() {
                became_terminal = true;
                session.ended_at = Some(event.timestamp);
            }
        }

        // Fields below are first-write-wins regardless of status ordering:
        // AMD and recording webhooks race the hangup webhook.
        if session.amd_result.is_none() && event.amd_result.is_some() {
            session.amd_result = event.amd_result;
            session.amd_confidence = event.amd_confidence;
            applied = true;
        }
        if session.hangup_reason.is_none() && event.hangup_reason.is_some() {
            session.hangup_reason = event.hangup_reason.clone();
            applied = true;
        }
        if session.recording.is_none() && event.recording.is_some() {
            session.recording = event.recording.clone();
            applied = true;
        }
        if session.duration_secs.is_none() && event.duration_secs.is_some() {
            session.duration_secs = event.duration_secs;
            applied = true;
        }

        Some((call_id, TransitionOutcome { applied, became_terminal }))
    }

    /// Append a final transcript line.
    pub fn append_transcript(&self, call_id: &Uuid, line: TranscriptLine) {
        if let Some(mut session) = self.sessions.get_mut(call_id) {
            session.transcript.push(line);
        }
    }

    /// Persist the qualification result. First write wins.
    pub fn set_qualification(&self, call_id: &Uuid, qualification: Qualification) -> bool {
        let Some(mut session) = self.sessions.get_mut(call_id) else {
            return false;
        };
        if session.qualification.is_some() {
            return false;
        }
        if let Some(disposition) = qualification.disposition.clone() {
            session.set_disposition_once(disposition);
        }
        session.qualification = Some(qualification);
        true
    }

    pub fn set_disposition(&self, call_id: &Uuid, disposition: &str) -> bool {
        self.sessions
            .get_mut(call_id)
            .map(|mut s| s.set_disposition_once(disposition))
            .unwrap_or(false)
    }

    pub fn record_webhook(&self, record: WebhookAuditRecord) {
        self.webhook_audit.lock().push(record);
    }

    pub fn record_health_event(&self, record: HealthEventRecord) {
        self.health_events.lock().push(record);
    }

    pub fn webhook_audit(&self) -> Vec<WebhookAuditRecord> {
        self.webhook_audit.lock().clone()
    }

    pub fn health_events(&self) -> Vec<HealthEventRecord> {
        self.health_events.lock().clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(provider_call_id: &str, status: CallStatus) -> CallEvent {
        CallEvent {
            event_id: format!("{provider_call_id}-{status}"),
            provider: TelephonyProvider::Twilio,
            provider_call_id: provider_call_id.to_string(),
            event_type: CallEventType::Status,
            status,
            timestamp: Utc::now(),
            hangup_reason: None,
            amd_result: None,
            amd_confidence: None,
            recording: None,
            duration_secs: None,
        }
    }

    fn store_with_session(provider_call_id: &str) -> (SessionStore, Uuid) {
        let store = SessionStore::new();
        let session = CallSession::new(
            TelephonyProvider::Twilio,
            provider_call_id.to_string(),
            "lead-1".to_string(),
            0,
            1,
            CallStatus::Initiated,
        );
        let call_id = store.insert_session(session);
        (store, call_id)
    }

    #[test]
    fn test_unknown_call_is_noop() {
        let store = SessionStore::new();
        assert!(store.apply_event(&event("CA-none", CallStatus::Ringing)).is_none());
    }

    #[test]
    fn test_status_progression_and_answered_at() {
        let (store, call_id) = store_with_session("CA1");

        store.apply_event(&event("CA1", CallStatus::Ringing)).unwrap();
        let (_, outcome) = store.apply_event(&event("CA1", CallStatus::InProgress)).unwrap();
        assert!(outcome.applied);
        assert!(!outcome.became_terminal);

        let session = store.session(&call_id).unwrap();
        assert_eq!(session.status, CallStatus::InProgress);
        assert!(session.answered_at.is_some());
    }

    #[test]
    fn test_terminal_event_is_exactly_once() {
        let (store, call_id) = store_with_session("CA2");

        let (_, first) = store.apply_event(&event("CA2", CallStatus::NoAnswer)).unwrap();
        assert!(first.became_terminal);

        // Identical redelivery: no transition, no second terminal signal.
        let (_, second) = store.apply_event(&event("CA2", CallStatus::NoAnswer)).unwrap();
        assert!(!second.became_terminal);
        assert!(!second.applied);

        // A different status after terminal is ignored too.
        let (_, third) = store.apply_event(&event("CA2", CallStatus::Completed)).unwrap();
        assert!(!third.became_terminal);
        assert_eq!(store.session(&call_id).unwrap().status, CallStatus::NoAnswer);
    }

    #[test]
    fn test_recording_attaches_after_terminal() {
        let (store, call_id) = store_with_session("CA3");
        store.apply_event(&event("CA3", CallStatus::Completed)).unwrap();

        let mut recording_event = event("CA3", CallStatus::Completed);
        recording_event.recording = Some(Recording {
            id: "RE1".to_string(),
            call_id: "CA3".to_string(),
            url: "https://example/RE1".to_string(),
            format: "wav".to_string(),
            duration_secs: Some(12),
            size_bytes: None,
            status: crate::core::telephony::RecordingStatus::Ready,
            provider: TelephonyProvider::Twilio,
            requires_auth: true,
            auth_method: crate::core::telephony::RecordingAuthMethod::BasicAuth,
        });
        let (_, outcome) = store.apply_event(&recording_event).unwrap();
        assert!(outcome.applied);
        assert!(!outcome.became_terminal);
        assert!(store.session(&call_id).unwrap().recording.is_some());
    }

    #[test]
    fn test_disposition_first_write_wins() {
        let (store, call_id) = store_with_session("CA4");
        assert!(store.set_disposition(&call_id, "qualified"));
        assert!(!store.set_disposition(&call_id, "no_answer"));
        assert_eq!(
            store.session(&call_id).unwrap().disposition.as_deref(),
            Some("qualified")
        );
    }

    #[test]
    fn test_qualification_set_once_and_fills_disposition() {
        let (store, call_id) = store_with_session("CA5");
        let qualification = Qualification {
            version: 1,
            status: "qualified".to_string(),
            sentiment: Some("positive".to_string()),
            disposition: Some("interested".to_string()),
            callback_time: None,
            answers: Vec::new(),
        };
        assert!(store.set_qualification(&call_id, qualification.clone()));
        assert!(!store.set_qualification(&call_id, qualification));

        let session = store.session(&call_id).unwrap();
        assert_eq!(session.disposition.as_deref(), Some("interested"));
    }
}
