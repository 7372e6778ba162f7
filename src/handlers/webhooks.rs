//! Vendor webhook ingestion.
//!
//! One endpoint per vendor, each speaking that vendor's transport encoding:
//! Twilio posts form-encoded key/value pairs, Telnyx posts a JSON envelope.
//! Both endpoints acknowledge with the vendor's expected 200 body no matter
//! what happened internally — a processing failure here must never cause
//! vendor-side redelivery storms. Failures are logged and the event is
//! dropped; the audit trail lives in the session store.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::core::telephony::{RawWebhook, TelephonyProvider};
use crate::state::AppState;

/// Header carrying the hex HMAC-SHA256 of the raw body, for vendors
/// configured with a shared webhook secret.
const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// `POST /webhooks/twilio` — form-encoded status callbacks.
pub async fn twilio_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if verify_signature(&state, TelephonyProvider::Twilio, &headers, &body) {
        match parse_form(&body) {
            Ok(fields) => {
                state
                    .orchestrator
                    .ingest_webhook(TelephonyProvider::Twilio, RawWebhook::Form(fields))
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable Twilio webhook body, dropping");
            }
        }
    }

    // Twilio treats the response body as TwiML; an empty <Response/> is the
    // canonical acknowledgment.
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        r#"<?xml version="1.0" encoding="UTF-8"?><Response/>"#,
    )
        .into_response()
}

/// `POST /webhooks/telnyx` — JSON event envelopes.
pub async fn telnyx_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if verify_signature(&state, TelephonyProvider::Telnyx, &headers, &body) {
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(value) => {
                state
                    .orchestrator
                    .ingest_webhook(TelephonyProvider::Telnyx, RawWebhook::Json(value))
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable Telnyx webhook body, dropping");
            }
        }
    }

    (StatusCode::OK, axum::Json(serde_json::json!({}))).into_response()
}

/// Check the shared-secret HMAC when one is configured for the vendor.
///
/// Returns whether the event should be processed. A failed check drops the
/// event (logged) but the endpoint still acknowledges 200 — signature
/// failures are our problem to investigate, not the vendor's to retry.
fn verify_signature(
    state: &AppState,
    provider: TelephonyProvider,
    headers: &HeaderMap,
    body: &[u8],
) -> bool {
    let Some(secret) = state.config.webhook_secret(provider) else {
        return true;
    };

    let Some(presented) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        tracing::warn!(%provider, "Webhook missing signature header, dropping event");
        return false;
    };

    let Ok(presented_bytes) = hex::decode(presented.trim()) else {
        tracing::warn!(%provider, "Webhook signature is not valid hex, dropping event");
        return false;
    };

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    let valid: bool = expected.ct_eq(&presented_bytes).into();
    if !valid {
        tracing::warn!(%provider, "Webhook signature mismatch, dropping event");
    }
    valid
}

fn parse_form(body: &[u8]) -> Result<HashMap<String, String>, std::str::Utf8Error> {
    let text = std::str::from_utf8(body)?;
    Ok(url::form_urlencoded::parse(text.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_form() {
        let fields =
            parse_form(b"CallSid=CA123&CallStatus=completed&To=%2B15550001111").unwrap();
        assert_eq!(fields.get("CallSid").unwrap(), "CA123");
        assert_eq!(fields.get("CallStatus").unwrap(), "completed");
        assert_eq!(fields.get("To").unwrap(), "+15550001111");
    }

    #[test]
    fn test_parse_form_empty_body() {
        assert!(parse_form(b"").unwrap().is_empty());
    }

    #[test]
    fn test_hmac_signature_round_trip() {
        let secret = b"shared-secret";
        let body = br#"{"data":{"event_type":"call.hangup"}}"#;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(body);
        let expected = mac.finalize().into_bytes();
        let presented = hex::decode(&signature).unwrap();
        assert!(bool::from(expected.ct_eq(presented.as_slice())));
    }
}
