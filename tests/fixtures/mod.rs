//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::NaiveTime;

use dialgate::config::{ServerConfig, TlsConfig, VendorSettings};
use dialgate::core::scheduler::CallingHours;
use dialgate::core::sessions::LeadProfile;
use dialgate::core::telephony::TelephonyProvider;
use dialgate::state::AppState;

/// Minimal configuration with Twilio credentials pointed nowhere useful.
/// Tests that talk to a vendor override `twilio_*` or use wiremock-backed
/// adapters directly.
pub fn test_config() -> ServerConfig {
    let mut vendor_settings = HashMap::new();
    vendor_settings.insert(
        TelephonyProvider::Twilio,
        VendorSettings {
            from_number: Some("+15550009999".to_string()),
            webhook_secret: None,
        },
    );
    vendor_settings.insert(TelephonyProvider::Telnyx, VendorSettings::default());

    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None::<TlsConfig>,
        public_webhook_base: None,
        public_media_base: None,
        dial_provider: TelephonyProvider::Twilio,
        twilio_account_sid: Some("AC_test".to_string()),
        twilio_auth_token: Some("test-token".to_string()),
        telnyx_api_key: None,
        telnyx_connection_id: None,
        vendor_settings,
        agent_url: "wss://engine.example/v1/stream".to_string(),
        agent_api_key: "engine-key".to_string(),
        agent_model: "conversational-v2".to_string(),
        agent_voice: "river".to_string(),
        greeting: "Hi {{first_name}}, calling about {{property_address}}.".to_string(),
        questions: vec!["Are you the owner of {{property_address}}?".to_string()],
        disqualifiers: Vec::new(),
        pass_interval: Duration::from_secs(3600),
        max_attempts: 3,
        retry_delay: Duration::ZERO,
        ring_timeout_secs: 30,
        calling_hours: CallingHours {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        },
        health_interval: Duration::from_secs(3600),
        health_probe_timeout: Duration::from_secs(1),
        health_failure_threshold: 3,
        auth_required: false,
        auth_api_secrets: Vec::new(),
        cors_allowed_origins: None,
        rate_limit_requests_per_second: 100_000,
        rate_limit_burst_size: 100,
        max_websocket_connections: None,
        max_connections_per_ip: 100,
    }
}

pub fn test_state(config: ServerConfig) -> Arc<AppState> {
    AppState::new(config).expect("test AppState builds")
}

/// The webhook + public + operator-API app, the way main.rs assembles it
/// (without the auth/limit middleware unless a test adds them).
pub fn test_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/",
            axum::routing::get(dialgate::handlers::api::health_check),
        )
        .merge(dialgate::routes::webhooks::create_webhook_router())
        .merge(dialgate::routes::api::create_api_router())
        .with_state(state)
}

pub fn lead(id: &str, numbers: &[&str], timezone: &str) -> LeadProfile {
    LeadProfile {
        id: id.to_string(),
        first_name: Some("Dana".to_string()),
        last_name: Some("Reyes".to_string()),
        property_address: Some("12 Oak St".to_string()),
        phone_numbers: numbers.iter().map(|n| n.to_string()).collect(),
        timezone: timezone.to_string(),
    }
}

/// A Twilio status-callback form body.
pub fn twilio_status_body(call_sid: &str, status: &str, sequence: u32) -> String {
    format!(
        "CallSid={call_sid}&CallStatus={status}&SequenceNumber={sequence}&AccountSid=AC_test"
    )
}

/// A Telnyx webhook JSON body.
pub fn telnyx_event_body(event_id: &str, event_type: &str, call_control_id: &str) -> String {
    serde_json::json!({
        "data": {
            "record_type": "event",
            "id": event_id,
            "event_type": event_type,
            "occurred_at": "2025-08-05T14:00:00Z",
            "payload": { "call_control_id": call_control_id },
        }
    })
    .to_string()
}

/// One 20 ms frame of mu-law "silence" (0xFF encodes ~0).
pub fn mulaw_silence_frame() -> Vec<u8> {
    vec![0xFF; 160]
}
