//! Telnyx telephony adapter.
//!
//! Implements [`BaseTelephony`] against the Telnyx Call Control v2 API
//! (JSON requests, bearer auth) and normalizes Telnyx's enveloped JSON
//! webhooks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use tracing::warn;

use super::config::TelnyxConfig;
use super::messages::{
    TelnyxCallData, TelnyxEnvelope, TelnyxErrorBody, classify_error_title, map_amd_result,
    map_event_type, map_hangup_cause,
};
use crate::core::telephony::TelephonyProvider;
use crate::core::telephony::base::{
    AmdConfig, AmdResult, BaseTelephony, CallEvent, CallEventType, CallStatus, EndOutcome,
    EndReason, HealthCheckOutcome, InitiateOptions, InitiateOutcome, RawWebhook, Recording,
    RecordingAuthMethod, RecordingRef, RecordingStatus, StatusSnapshot, normalize_amd_confidence,
};
use crate::core::telephony::error::{ErrorDetails, TelephonyError, TelephonyResult};

/// Telnyx telephony adapter.
pub struct TelnyxTelephony {
    config: TelnyxConfig,
    http: reqwest::Client,
    amd: RwLock<AmdConfig>,
}

impl TelnyxTelephony {
    pub fn new(config: TelnyxConfig) -> TelephonyResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(TelephonyError::from_transport)?;
        let amd = RwLock::new(config.amd.clone());
        Ok(Self { config, http, amd })
    }

    fn calls_url(&self) -> String {
        format!("{}/v2/calls", self.config.api_base)
    }

    fn action_url(&self, call_control_id: &str, action: &str) -> String {
        format!(
            "{}/v2/calls/{}/actions/{}",
            self.config.api_base, call_control_id, action
        )
    }

    /// Classify a non-2xx Telnyx response: error title keywords first, HTTP
    /// status second. Rate-limit headers are preserved as metadata.
    async fn classify_response(&self, response: reqwest::Response) -> TelephonyError {
        let status = response.status().as_u16();

        let mut details = ErrorDetails::new("Telnyx request failed");
        for header in ["x-ratelimit-limit", "x-ratelimit-remaining", "retry-after"] {
            if let Some(value) = response.headers().get(header).and_then(|v| v.to_str().ok()) {
                details = details.with_metadata(header.trim_start_matches("x-"), value.to_string());
            }
        }

        let body: Option<TelnyxErrorBody> = response.json().await.ok();
        let mut title_kind = None;
        if let Some(body) = &body
            && let Some(first) = body.errors.first()
        {
            if let Some(code) = &first.code {
                details = details.with_code(code.clone());
            }
            if let Some(title) = &first.title {
                details.message = first
                    .detail
                    .clone()
                    .unwrap_or_else(|| title.clone());
                title_kind = classify_error_title(title);
            }
        }

        match title_kind {
            Some(kind) => kind.build(details),
            None => TelephonyError::from_http_status(status, details),
        }
    }

    fn recording_from_payload(&self, raw: &RawWebhook) -> Option<Recording> {
        let url = raw
            .get_path("data.payload.recording_urls.wav")
            .or_else(|| raw.get_path("data.payload.recording_urls.mp3"))?
            .to_string();
        let format = if url.ends_with(".mp3") { "mp3" } else { "wav" };
        let id = raw
            .get_path("data.payload.recording_id")
            .map(str::to_string)
            .unwrap_or_else(|| recording_id_from_url(&url));
        let call_id = raw
            .get_path("data.payload.call_control_id")
            .unwrap_or_default()
            .to_string();
        let duration_secs = raw
            .get_path("data.payload.duration_millis")
            .and_then(|d| d.parse::<u64>().ok())
            .map(|ms| ms / 1000);

        Some(Recording {
            id,
            call_id,
            url,
            format: format.to_string(),
            duration_secs,
            size_bytes: None,
            status: RecordingStatus::Ready,
            provider: TelephonyProvider::Telnyx,
            requires_auth: true,
            auth_method: RecordingAuthMethod::BearerToken,
        })
    }
}

fn recording_id_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .unwrap_or(url)
        .trim_end_matches(".wav")
        .trim_end_matches(".mp3")
        .to_string()
}

#[async_trait]
impl BaseTelephony for TelnyxTelephony {
    fn provider(&self) -> TelephonyProvider {
        TelephonyProvider::Telnyx
    }

    async fn initiate_call(
        &self,
        to: &str,
        from: &str,
        options: &InitiateOptions,
    ) -> TelephonyResult<InitiateOutcome> {
        let amd = options.amd.clone().unwrap_or_else(|| self.amd.read().clone());

        let mut body = json!({
            "to": to,
            "from": from,
            "connection_id": self.config.connection_id,
        });

        if let Some(stream_url) = &options.stream_url {
            body["stream_url"] = json!(stream_url);
            body["stream_track"] = json!("both_tracks");
        }
        if let Some(callback) = &options.status_callback_url {
            body["webhook_url"] = json!(callback);
        }
        if amd.enabled {
            let mode = if amd.detect_message_end { "detect_beep" } else { "detect" };
            body["answering_machine_detection"] = json!(mode);
            body["answering_machine_detection_config"] = json!({
                "total_analysis_time_millis": amd.timeout_ms,
            });
        }
        if let Some(timeout) = options.timeout_secs {
            body["timeout_secs"] = json!(timeout);
        }

        let response = self
            .http
            .post(self.calls_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(TelephonyError::from_transport)?;

        if !response.status().is_success() {
            return Err(self.classify_response(response).await);
        }

        let envelope: TelnyxEnvelope<TelnyxCallData> =
            response.json().await.map_err(TelephonyError::from_transport)?;

        Ok(InitiateOutcome {
            provider_call_id: envelope.data.call_control_id,
            status: CallStatus::Initiated,
        })
    }

    async fn end_call(
        &self,
        provider_call_id: &str,
        reason: EndReason,
    ) -> TelephonyResult<EndOutcome> {
        tracing::info!(call_control_id = provider_call_id, %reason, "Ending Telnyx call");

        let response = self
            .http
            .post(self.action_url(provider_call_id, "hangup"))
            .bearer_auth(&self.config.api_key)
            .json(&json!({}))
            .send()
            .await
            .map_err(TelephonyError::from_transport)?;

        if !response.status().is_success() {
            return Err(self.classify_response(response).await);
        }

        Ok(EndOutcome {
            status: CallStatus::Completed,
        })
    }

    async fn get_call_status(&self, provider_call_id: &str) -> TelephonyResult<StatusSnapshot> {
        let url = format!("{}/v2/calls/{}", self.config.api_base, provider_call_id);
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(TelephonyError::from_transport)?;

        if !response.status().is_success() {
            return Err(self.classify_response(response).await);
        }

        let envelope: TelnyxEnvelope<TelnyxCallData> =
            response.json().await.map_err(TelephonyError::from_transport)?;

        // The call resource only reports liveness; granular status arrives
        // via webhooks.
        let status = match envelope.data.is_alive {
            Some(true) => CallStatus::InProgress,
            _ => CallStatus::Completed,
        };

        Ok(StatusSnapshot {
            status,
            duration_secs: None,
            amd_result: None,
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
                let format = if url.ends_with(".mp3") { "mp3" } else { "wav" };
                Ok(Recording {
                    id: recording_id_from_url(&url),
                    call_id: String::new(),
                    url,
                    format: format.to_string(),
                    duration_secs: None,
                    size_bytes: None,
                    status: RecordingStatus::Ready,
                    provider: TelephonyProvider::Telnyx,
                    requires_auth: true,
                    auth_method: RecordingAuthMethod::BearerToken,
                })
            }
        }
    }

    fn configure_amd(&self, config: AmdConfig) {
        *self.amd.write() = config;
    }

    async fn health_check(&self) -> HealthCheckOutcome {
        let url = format!("{}/v2/phone_numbers", self.config.api_base);
        let started = Instant::now();
        let result = self
            .http
            .get(url)
            .query(&[("page[size]", "1")])
            .bearer_auth(&self.config.api_key)
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
        let event_type_raw = raw.get_path("data.event_type").unwrap_or_default().to_string();
        let provider_call_id = raw
            .get_path("data.payload.call_control_id")
            .unwrap_or_default()
            .to_string();
        let hangup_reason = raw
            .get_path("data.payload.hangup_cause")
            .map(str::to_string);

        let amd_result = raw.get_path("data.payload.result").map(|result| {
            map_amd_result(result).unwrap_or_else(|| {
                warn!(result, "Unrecognized Telnyx AMD result");
                AmdResult::Unknown
            })
        });
        let amd_confidence = raw
            .get_path("data.payload.confidence")
            .and_then(|c| c.parse::<f64>().ok())
            .map(normalize_amd_confidence);

        let recording = self.recording_from_payload(raw);

        // Event-type table, refined by hangup cause on call.hangup, then
        // substring inference, then the configured default.
        let status = match event_type_raw.as_str() {
            "call.hangup" => hangup_reason
                .as_deref()
                .and_then(map_hangup_cause)
                .unwrap_or(CallStatus::Completed),
            other => map_event_type(other)
                .or_else(|| CallStatus::infer(other))
                .unwrap_or_else(|| {
                    warn!(
                        event_type = other,
                        fallback = %self.config.default_status,
                        "Unknown Telnyx event type, using configured default"
                    );
                    self.config.default_status
                }),
        };

        let event_type = if event_type_raw == "call.machine.detection.ended"
            || event_type_raw == "call.machine.greeting.ended"
        {
            CallEventType::Amd
        } else if recording.is_some() {
            CallEventType::Recording
        } else if event_type_raw.starts_with("call.") {
            CallEventType::Status
        } else {
            CallEventType::Unknown
        };

        let timestamp = raw
            .get_path("data.occurred_at")
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let event_id = raw
            .get_path("data.id")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{provider_call_id}-{event_type_raw}"));

        CallEvent {
            event_id,
            provider: TelephonyProvider::Telnyx,
            provider_call_id,
            event_type,
            status,
            timestamp,
            hangup_reason,
            amd_result,
            amd_confidence,
            recording,
            duration_secs: raw
                .get_path("data.payload.call_duration_secs")
                .and_then(|d| d.parse().ok()),
        }
    }
}
