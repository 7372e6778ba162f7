//! Twilio telephony adapter.
//!
//! Implements [`BaseTelephony`] against the Twilio Voice REST API
//! (form-encoded requests, HTTP basic auth) and normalizes Twilio's
//! form-encoded status/AMD/recording webhooks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::warn;

use super::config::TwilioConfig;
use super::messages::{
    ERROR_CODE_TABLE, TwilioCallResource, TwilioErrorBody, map_answered_by, map_call_status,
};
use crate::core::telephony::TelephonyProvider;
use crate::core::telephony::base::{
    AmdConfig, BaseTelephony, CallEvent, CallEventType, CallStatus, EndOutcome, EndReason,
    HealthCheckOutcome, InitiateOptions, InitiateOutcome, RawWebhook, Recording, RecordingAuthMethod,
    RecordingRef, RecordingStatus, StatusSnapshot, normalize_amd_confidence,
};
use crate::core::telephony::error::{ErrorDetails, TelephonyError, TelephonyResult};

/// Twilio Voice API version segment.
const API_VERSION: &str = "2010-04-01";

/// Twilio telephony adapter.
pub struct TwilioTelephony {
    config: TwilioConfig,
    http: reqwest::Client,
    amd: RwLock<AmdConfig>,
}

impl TwilioTelephony {
    pub fn new(config: TwilioConfig) -> TelephonyResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(TelephonyError::from_transport)?;
        let amd = RwLock::new(config.amd.clone());
        Ok(Self { config, http, amd })
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/{}/Accounts/{}/Calls.json",
            self.config.api_base, API_VERSION, self.config.account_sid
        )
    }

    fn call_url(&self, sid: &str) -> String {
        format!(
            "{}/{}/Accounts/{}/Calls/{}.json",
            self.config.api_base, API_VERSION, self.config.account_sid, sid
        )
    }

    /// Classify a non-2xx Twilio response: vendor error code first, HTTP
    /// status second. Rate-limit headers are preserved as metadata.
    async fn classify_response(&self, response: reqwest::Response) -> TelephonyError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body: Option<TwilioErrorBody> = response.json().await.ok();
        let (code, message) = match &body {
            Some(b) => (
                b.code,
                b.message.clone().unwrap_or_else(|| "Twilio request failed".to_string()),
            ),
            None => (None, "Twilio request failed".to_string()),
        };

        let mut details = ErrorDetails::new(message);
        if let Some(code) = code {
            details = details.with_code(code.to_string());
        }
        if let Some(retry_after) = retry_after {
            details = details.with_metadata("retry_after", retry_after);
        }

        if let Some(kind) = code.and_then(|c| ERROR_CODE_TABLE.get(&c).copied()) {
            kind.build(details)
        } else {
            TelephonyError::from_http_status(status, details)
        }
    }

    /// Inline TwiML that connects the answered call to our media stream.
    fn connect_twiml(stream_url: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><Response><Connect><Stream url="{stream_url}"/></Connect></Response>"#
        )
    }

    fn build_recording(&self, id: String, call_id: String, url: String, duration_secs: Option<u64>, status: RecordingStatus) -> Recording {
        Recording {
            id,
            call_id,
            url,
            format: "wav".to_string(),
            duration_secs,
            size_bytes: None,
            status,
            provider: TelephonyProvider::Twilio,
            requires_auth: true,
            auth_method: RecordingAuthMethod::BasicAuth,
        }
    }

    fn recording_from_payload(&self, raw: &RawWebhook) -> Option<Recording> {
        let url = raw.get("RecordingUrl")?.to_string();
        let id = raw
            .get("RecordingSid")
            .map(str::to_string)
            .unwrap_or_else(|| recording_sid_from_url(&url));
        let call_id = raw.get("CallSid").unwrap_or_default().to_string();
        let duration = raw.get("RecordingDuration").and_then(|d| d.parse().ok());
        let status = match raw.get("RecordingStatus") {
            Some("in-progress") => RecordingStatus::Processing,
            Some("absent") | Some("failed") => RecordingStatus::Failed,
            _ => RecordingStatus::Ready,
        };
        Some(self.build_recording(id, call_id, url, duration, status))
    }
}

/// Derive the recording SID from a stored media URL
/// (`.../Recordings/RExxxx` with an optional extension).
fn recording_sid_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .unwrap_or(url)
        .trim_end_matches(".json")
        .trim_end_matches(".wav")
        .trim_end_matches(".mp3")
        .to_string()
}

#[async_trait]
impl BaseTelephony for TwilioTelephony {
    fn provider(&self) -> TelephonyProvider {
        TelephonyProvider::Twilio
    }

    async fn initiate_call(
        &self,
        to: &str,
        from: &str,
        options: &InitiateOptions,
    ) -> TelephonyResult<InitiateOutcome> {
        let amd = options.amd.clone().unwrap_or_else(|| self.amd.read().clone());

        let mut form: Vec<(&str, String)> = vec![
            ("To", to.to_string()),
            ("From", from.to_string()),
        ];

        match &options.stream_url {
            Some(stream_url) => form.push(("Twiml", Self::connect_twiml(stream_url))),
            // Without a media stream the call has nothing to say; park it
            // long enough for an operator to intervene.
            None => form.push(("Twiml", "<Response><Pause length=\"60\"/></Response>".to_string())),
        }

        if let Some(callback) = &options.status_callback_url {
            form.push(("StatusCallback", callback.clone()));
            for event in ["initiated", "ringing", "answered", "completed"] {
                form.push(("StatusCallbackEvent", event.to_string()));
            }
        }

        if amd.enabled {
            let mode = if amd.detect_message_end { "DetectMessageEnd" } else { "Enable" };
            form.push(("MachineDetection", mode.to_string()));
            form.push((
                "MachineDetectionTimeout",
                (amd.timeout_ms / 1000).max(3).to_string(),
            ));
            if let Some(callback) = &options.status_callback_url {
                form.push(("AsyncAmd", "true".to_string()));
                form.push(("AsyncAmdStatusCallback", callback.clone()));
            }
        }

        if let Some(timeout) = options.timeout_secs {
            form.push(("Timeout", timeout.to_string()));
        }

        let response = self
            .http
            .post(self.calls_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(TelephonyError::from_transport)?;

        if !response.status().is_success() {
            return Err(self.classify_response(response).await);
        }

        let call: TwilioCallResource =
            response.json().await.map_err(TelephonyError::from_transport)?;
        let status = map_call_status(&call.status)
            .or_else(|| CallStatus::infer(&call.status))
            .unwrap_or(CallStatus::Queued);

        Ok(InitiateOutcome {
            provider_call_id: call.sid,
            status,
        })
    }

    async fn end_call(
        &self,
        provider_call_id: &str,
        reason: EndReason,
    ) -> TelephonyResult<EndOutcome> {
        tracing::info!(call_sid = provider_call_id, %reason, "Ending Twilio call");

        let response = self
            .http
            .post(self.call_url(provider_call_id))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await
            .map_err(TelephonyError::from_transport)?;

        if !response.status().is_success() {
            return Err(self.classify_response(response).await);
        }

        let call: TwilioCallResource =
            response.json().await.map_err(TelephonyError::from_transport)?;
        let status = map_call_status(&call.status)
            .or_else(|| CallStatus::infer(&call.status))
            .unwrap_or(CallStatus::Completed);

        Ok(EndOutcome { status })
    }

    async fn get_call_status(&self, provider_call_id: &str) -> TelephonyResult<StatusSnapshot> {
        let response = self
            .http
            .get(self.call_url(provider_call_id))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .send()
            .await
            .map_err(TelephonyError::from_transport)?;

        if !response.status().is_success() {
            return Err(self.classify_response(response).await);
        }

        let call: TwilioCallResource =
            response.json().await.map_err(TelephonyError::from_transport)?;

        Ok(StatusSnapshot {
            status: map_call_status(&call.status)
                .or_else(|| CallStatus::infer(&call.status))
                .unwrap_or(self.config.default_status),
            duration_secs: call.duration.as_deref().and_then(|d| d.parse().ok()),
            amd_result: call.answered_by.as_deref().and_then(map_answered_by),
        })
    }

    async fn get_recording(&self, reference: RecordingRef) -> TelephonyResult<Recording> {
        match reference {
            RecordingRef::Payload(raw) => self.recording_from_payload(&raw).ok_or_else(|| {
                TelephonyError::validation("Webhook payload does not describe a recording")
            }),
            RecordingRef::Url(url) => {
                if url.is_empty() {
                    return Err(TelephonyError::validation("Recording URL is empty"));
                }
                let id = recording_sid_from_url(&url);
                Ok(self.build_recording(id, String::new(), url, None, RecordingStatus::Ready))
            }
        }
    }

    fn configure_amd(&self, config: AmdConfig) {
        *self.amd.write() = config;
    }

    async fn health_check(&self) -> HealthCheckOutcome {
        let url = format!(
            "{}/{}/Accounts/{}.json",
            self.config.api_base, API_VERSION, self.config.account_sid
        );
        let started = Instant::now();
        let result = self
            .http
            .get(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .send()
            .await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status().is_success() => HealthCheckOutcome {
                healthy: true,
                response_time_ms,
                error: None,
            },
            Ok(response) => HealthCheckOutcome {
                healthy: false,
                response_time_ms,
                error: Some(format!("HTTP {}", response.status().as_u16())),
            },
            Err(e) => HealthCheckOutcome {
                healthy: false,
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }

    fn map_event(&self, raw: &RawWebhook) -> CallEvent {
        let provider_call_id = raw.get("CallSid").unwrap_or_default().to_string();

        let amd_result = raw.get("AnsweredBy").map(|answered_by| {
            map_answered_by(answered_by).unwrap_or_else(|| {
                warn!(answered_by, "Unrecognized Twilio AnsweredBy value");
                crate::core::telephony::base::AmdResult::Unknown
            })
        });
        let amd_confidence = raw
            .get("MachineDetectionConfidence")
            .and_then(|c| c.parse::<f64>().ok())
            .map(normalize_amd_confidence);

        let recording = self.recording_from_payload(raw);

        let status_raw = raw.get("CallStatus");
        let status = match status_raw {
            Some(s) => map_call_status(s)
                .or_else(|| CallStatus::infer(s))
                .unwrap_or_else(|| {
                    warn!(
                        status = s,
                        fallback = %self.config.default_status,
                        "Unknown Twilio call status, using configured default"
                    );
                    self.config.default_status
                }),
            // Async AMD callbacks arrive without a CallStatus while the
            // call is live.
            None if amd_result.is_some() => CallStatus::InProgress,
            None => self.config.default_status,
        };

        let event_type = if amd_result.is_some() {
            CallEventType::Amd
        } else if recording.is_some() {
            CallEventType::Recording
        } else if status_raw.is_some() {
            CallEventType::Status
        } else {
            CallEventType::Unknown
        };

        let timestamp = raw
            .get("Timestamp")
            .and_then(|t| DateTime::parse_from_rfc2822(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        // Twilio has no event id; SequenceNumber plus the call SID is stable
        // across redeliveries of the same callback.
        let event_id = match raw.get("SequenceNumber") {
            Some(seq) => format!("{provider_call_id}-{seq}"),
            None => format!(
                "{provider_call_id}-{}-{}",
                status_raw.unwrap_or("none"),
                raw.get("AnsweredBy").unwrap_or("none")
            ),
        };

        CallEvent {
            event_id,
            provider: TelephonyProvider::Twilio,
            provider_call_id,
            event_type,
            status,
            timestamp,
            hangup_reason: raw.get("SipResponseCode").map(str::to_string),
            amd_result,
            amd_confidence,
            recording,
            duration_secs: raw.get("CallDuration").and_then(|d| d.parse().ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::core::telephony::base::AmdResult;

    fn adapter() -> TwilioTelephony {
        TwilioTelephony::new(TwilioConfig::new("AC_test", "token")).unwrap()
    }

    fn form(pairs: &[(&str, &str)]) -> RawWebhook {
        RawWebhook::Form(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn test_map_event_status_callback() {
        let raw = form(&[
            ("CallSid", "CA123"),
            ("CallStatus", "ringing"),
            ("SequenceNumber", "2"),
        ]);
        let event = adapter().map_event(&raw);
        assert_eq!(event.provider_call_id, "CA123");
        assert_eq!(event.status, CallStatus::Ringing);
        assert_eq!(event.event_type, CallEventType::Status);
        assert_eq!(event.event_id, "CA123-2");
    }

    #[test]
    fn test_map_event_unknown_status_falls_back() {
        // Inference first, configured default second; never an error.
        let inferred = adapter().map_event(&form(&[
            ("CallSid", "CA1"),
            ("CallStatus", "subscriber-busy"),
        ]));
        assert_eq!(inferred.status, CallStatus::Busy);

        let defaulted = adapter().map_event(&form(&[
            ("CallSid", "CA1"),
            ("CallStatus", "zorp"),
        ]));
        assert_eq!(defaulted.status, CallStatus::Queued);
    }

    #[test]
    fn test_map_event_amd_callback() {
        let raw = form(&[
            ("CallSid", "CA9"),
            ("AnsweredBy", "machine_end_beep"),
            ("MachineDetectionConfidence", "92"),
        ]);
        let event = adapter().map_event(&raw);
        assert_eq!(event.event_type, CallEventType::Amd);
        assert_eq!(event.amd_result, Some(AmdResult::Machine));
        assert_eq!(event.amd_confidence, Some(0.92));
        assert_eq!(event.status, CallStatus::InProgress);
    }

    #[test]
    fn test_map_event_is_deterministic() {
        let raw = form(&[
            ("CallSid", "CA5"),
            ("CallStatus", "completed"),
            ("SequenceNumber", "7"),
            ("CallDuration", "42"),
            ("Timestamp", "Tue, 05 Aug 2025 14:00:00 +0000"),
        ]);
        let a = adapter().map_event(&raw);
        let b = adapter().map_event(&raw);
        assert_eq!(a.event_id, b.event_id);
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.duration_secs, Some(42));
    }

    #[tokio::test]
    async fn test_recording_round_trip() {
        let adapter = adapter();
        let raw = form(&[
            ("CallSid", "CA7"),
            ("RecordingSid", "RE42"),
            ("RecordingUrl", "https://api.twilio.com/2010-04-01/Accounts/AC_test/Recordings/RE42"),
            ("RecordingDuration", "31"),
        ]);

        let from_payload = adapter
            .get_recording(RecordingRef::Payload(raw))
            .await
            .unwrap();
        assert_eq!(from_payload.id, "RE42");
        assert_eq!(from_payload.call_id, "CA7");
        assert_eq!(from_payload.duration_secs, Some(31));

        let from_url = adapter
            .get_recording(RecordingRef::Url(from_payload.url.clone()))
            .await
            .unwrap();
        assert_eq!(from_url.id, from_payload.id);
        assert_eq!(from_url.url, from_payload.url);
        assert!(from_url.requires_auth);
    }

    #[test]
    fn test_recording_sid_from_url_strips_extension() {
        assert_eq!(recording_sid_from_url("https://x/Recordings/RE1.wav"), "RE1");
        assert_eq!(recording_sid_from_url("https://x/Recordings/RE1"), "RE1");
    }
}
