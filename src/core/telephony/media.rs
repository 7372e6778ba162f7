//! Vendor media-stream protocol normalization.
//!
//! Both supported vendors stream call audio over a WebSocket they open
//! toward us, as JSON text frames carrying base64 mu-law payloads. The
//! vocabularies differ (Twilio says `streamSid`, Telnyx says `stream_id`;
//! tracks are named differently) but the shape is the same: a `start`
//! envelope identifying the call, `media` frames per direction, a `stop`
//! marker, and optional `dtmf`/`mark` events. This module parses each
//! vendor's frames into one [`MediaStreamMessage`] and renders our outbound
//! frames back into the vendor's dialect, so a single bridge implementation
//! serves every vendor.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde_json::{Value, json};

use super::TelephonyProvider;

/// Which call leg a media frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaTrack {
    /// Audio from the callee toward us
    Inbound,
    /// Audio we sent, echoed back by the vendor
    Outbound,
}

/// Audio format announced in a stream-start envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    /// Vendor encoding label, e.g. `audio/x-mulaw` or `PCMU`
    pub encoding: String,
    pub sample_rate: u32,
}

impl Default for MediaFormat {
    fn default() -> Self {
        Self {
            encoding: "audio/x-mulaw".to_string(),
            sample_rate: 8_000,
        }
    }
}

/// One normalized message from a vendor media socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaStreamMessage {
    /// Stream opened; identifies the call this socket belongs to.
    Start {
        provider_call_id: String,
        stream_id: String,
        format: MediaFormat,
    },
    /// One audio frame (decoded from base64, still mu-law).
    Media { track: MediaTrack, payload: Bytes },
    /// Stream closed by the vendor.
    Stop,
    /// Callee pressed a key.
    Dtmf { digit: String },
    /// Vendor acknowledged a mark we sent.
    Mark { name: String },
    /// Keepalive or vendor event we have no use for.
    Ignored,
}

/// Parse one text frame from a vendor media socket.
///
/// Forgiving on purpose: unknown event names and malformed frames come back
/// as [`MediaStreamMessage::Ignored`] so a vendor protocol addition never
/// tears down a live call. Only a `start` without a call id is unusable.
pub fn parse_media_message(provider: TelephonyProvider, text: &str) -> MediaStreamMessage {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        tracing::debug!(%provider, "Unparseable media frame, ignoring");
        return MediaStreamMessage::Ignored;
    };
    let event = value.get("event").and_then(Value::as_str).unwrap_or("");

    match event {
        "start" => parse_start(provider, &value),
        "media" => parse_media(provider, &value),
        "stop" => MediaStreamMessage::Stop,
        "dtmf" => {
            let digit = value
                .pointer("/dtmf/digit")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            MediaStreamMessage::Dtmf { digit }
        }
        "mark" => {
            let name = value
                .pointer("/mark/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            MediaStreamMessage::Mark { name }
        }
        // "connected" handshake and anything a vendor adds later.
        _ => MediaStreamMessage::Ignored,
    }
}

fn parse_start(provider: TelephonyProvider, value: &Value) -> MediaStreamMessage {
    let (call_id_path, stream_id) = match provider {
        TelephonyProvider::Twilio => (
            "/start/callSid",
            value
                .pointer("/start/streamSid")
                .or_else(|| value.get("streamSid"))
                .and_then(Value::as_str),
        ),
        TelephonyProvider::Telnyx => (
            "/start/call_control_id",
            value.get("stream_id").and_then(Value::as_str),
        ),
    };

    let Some(provider_call_id) = value.pointer(call_id_path).and_then(Value::as_str) else {
        tracing::warn!(%provider, "Media start frame without a call id");
        return MediaStreamMessage::Ignored;
    };

    let format_base = match provider {
        TelephonyProvider::Twilio => "/start/mediaFormat",
        TelephonyProvider::Telnyx => "/start/media_format",
    };
    let mut format = MediaFormat::default();
    if let Some(encoding) = value
        .pointer(&format!("{format_base}/encoding"))
        .and_then(Value::as_str)
    {
        format.encoding = encoding.to_string();
    }
    if let Some(rate) = value
        .pointer(&format!("{format_base}/sampleRate"))
        .or_else(|| value.pointer(&format!("{format_base}/sample_rate")))
        .and_then(Value::as_u64)
    {
        format.sample_rate = rate as u32;
    }

    MediaStreamMessage::Start {
        provider_call_id: provider_call_id.to_string(),
        stream_id: stream_id.unwrap_or_default().to_string(),
        format,
    }
}

fn parse_media(provider: TelephonyProvider, value: &Value) -> MediaStreamMessage {
    let Some(encoded) = value.pointer("/media/payload").and_then(Value::as_str) else {
        return MediaStreamMessage::Ignored;
    };
    let Ok(payload) = BASE64.decode(encoded) else {
        tracing::debug!(%provider, "Media payload is not valid base64, ignoring frame");
        return MediaStreamMessage::Ignored;
    };

    let track = match value.pointer("/media/track").and_then(Value::as_str) {
        Some("outbound") | Some("outbound_track") => MediaTrack::Outbound,
        // Twilio says "inbound", Telnyx "inbound_track"; default to the
        // callee leg when the field is absent.
        _ => MediaTrack::Inbound,
    };

    MediaStreamMessage::Media {
        track,
        payload: Bytes::from(payload),
    }
}

/// Render one outbound audio frame (mu-law bytes) in the vendor's dialect.
pub fn outbound_media_frame(
    provider: TelephonyProvider,
    stream_id: &str,
    payload: &[u8],
) -> String {
    let encoded = BASE64.encode(payload);
    let frame = match provider {
        TelephonyProvider::Twilio => json!({
            "event": "media",
            "streamSid": stream_id,
            "media": { "payload": encoded },
        }),
        TelephonyProvider::Telnyx => json!({
            "event": "media",
            "stream_id": stream_id,
            "media": { "payload": encoded },
        }),
    };
    frame.to_string()
}

/// Render the frame telling the vendor to drop buffered, unplayed audio.
pub fn outbound_clear_frame(provider: TelephonyProvider, stream_id: &str) -> String {
    let frame = match provider {
        TelephonyProvider::Twilio => json!({ "event": "clear", "streamSid": stream_id }),
        TelephonyProvider::Telnyx => json!({ "event": "clear", "stream_id": stream_id }),
    };
    frame.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_twilio_start() {
        let text = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": "MZxxxx",
                "callSid": "CAxxxx",
                "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
            },
            "streamSid": "MZxxxx"
        }"#;
        match parse_media_message(TelephonyProvider::Twilio, text) {
            MediaStreamMessage::Start {
                provider_call_id,
                stream_id,
                format,
            } => {
                assert_eq!(provider_call_id, "CAxxxx");
                assert_eq!(stream_id, "MZxxxx");
                assert_eq!(format.sample_rate, 8_000);
                assert_eq!(format.encoding, "audio/x-mulaw");
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_telnyx_start() {
        let text = r#"{
            "event": "start",
            "sequence_number": "1",
            "stream_id": "stream-123",
            "start": {
                "call_control_id": "v3:abcdef",
                "media_format": { "encoding": "PCMU", "sample_rate": 8000, "channels": 1 }
            }
        }"#;
        match parse_media_message(TelephonyProvider::Telnyx, text) {
            MediaStreamMessage::Start {
                provider_call_id,
                stream_id,
                format,
            } => {
                assert_eq!(provider_call_id, "v3:abcdef");
                assert_eq!(stream_id, "stream-123");
                assert_eq!(format.encoding, "PCMU");
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_media_decodes_payload_and_track() {
        let encoded = BASE64.encode([0x7Fu8, 0xFF, 0x00]);
        let text = format!(
            r#"{{"event":"media","streamSid":"MZ1","media":{{"track":"inbound","payload":"{encoded}"}}}}"#
        );
        match parse_media_message(TelephonyProvider::Twilio, &text) {
            MediaStreamMessage::Media { track, payload } => {
                assert_eq!(track, MediaTrack::Inbound);
                assert_eq!(payload.as_ref(), &[0x7F, 0xFF, 0x00]);
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_outbound_track_variants() {
        let encoded = BASE64.encode([1u8]);
        for track in ["outbound", "outbound_track"] {
            let text = format!(
                r#"{{"event":"media","media":{{"track":"{track}","payload":"{encoded}"}}}}"#
            );
            assert!(matches!(
                parse_media_message(TelephonyProvider::Telnyx, &text),
                MediaStreamMessage::Media {
                    track: MediaTrack::Outbound,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_unknown_event_and_garbage_are_ignored() {
        assert_eq!(
            parse_media_message(TelephonyProvider::Twilio, r#"{"event":"connected"}"#),
            MediaStreamMessage::Ignored
        );
        assert_eq!(
            parse_media_message(TelephonyProvider::Twilio, r#"{"event":"shiny-new-thing"}"#),
            MediaStreamMessage::Ignored
        );
        assert_eq!(
            parse_media_message(TelephonyProvider::Twilio, "not json at all"),
            MediaStreamMessage::Ignored
        );
    }

    #[test]
    fn test_parse_dtmf_and_stop() {
        assert_eq!(
            parse_media_message(
                TelephonyProvider::Twilio,
                r#"{"event":"dtmf","dtmf":{"track":"inbound_track","digit":"5"}}"#
            ),
            MediaStreamMessage::Dtmf {
                digit: "5".to_string()
            }
        );
        assert_eq!(
            parse_media_message(TelephonyProvider::Telnyx, r#"{"event":"stop","stream_id":"s"}"#),
            MediaStreamMessage::Stop
        );
    }

    #[test]
    fn test_outbound_frames_use_vendor_dialect() {
        let twilio = outbound_media_frame(TelephonyProvider::Twilio, "MZ1", &[0xAB]);
        assert!(twilio.contains("\"streamSid\":\"MZ1\""));
        assert!(twilio.contains("\"payload\""));

        let telnyx = outbound_media_frame(TelephonyProvider::Telnyx, "s-1", &[0xAB]);
        assert!(telnyx.contains("\"stream_id\":\"s-1\""));

        let clear = outbound_clear_frame(TelephonyProvider::Twilio, "MZ1");
        assert!(clear.contains("\"event\":\"clear\""));
        assert!(clear.contains("MZ1"));
    }

    #[test]
    fn test_media_payload_round_trip() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let frame = outbound_media_frame(TelephonyProvider::Twilio, "MZ1", &payload);
        let value: Value = serde_json::from_str(&frame).unwrap();
        let encoded = value.pointer("/media/payload").unwrap().as_str().unwrap();
        assert_eq!(BASE64.decode(encoded).unwrap(), payload);
    }
}
