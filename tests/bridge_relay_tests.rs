//! End-to-end bridge behavior against a mock voice-AI engine.
//!
//! A local WebSocket server stands in for the engine: it acknowledges the
//! session, records the instructions and caller audio it receives, and can
//! inject agent audio, transcripts, and a qualification result. The tests
//! drive the bridge exactly the way the media handler does.

mod fixtures;

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use dialgate::core::agent::{AgentConfig, SpeakerRole};
use dialgate::core::audio;
use dialgate::core::bridge::{
    AudioBridge, BridgeCloseReason, BridgeEvent, BridgeRegistry, BridgeState, CallContext,
    ProviderOutbound,
};

use fixtures::{lead, mulaw_silence_frame};

/// What the mock engine observed.
#[derive(Debug)]
enum EngineSeen {
    Instructions(String),
    Audio(Vec<u8>),
}

/// Commands for the mock engine to send back to the bridge.
enum EngineSend {
    Audio(Vec<u8>),
    Json(serde_json::Value),
}

/// One-connection mock engine. Returns its ws:// URL, a receiver of what it
/// saw, and a sender for injecting engine output.
async fn spawn_mock_engine() -> (String, mpsc::Receiver<EngineSeen>, mpsc::Sender<EngineSend>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (seen_tx, seen_rx) = mpsc::channel(256);
    let (send_tx, mut send_rx) = mpsc::channel::<EngineSend>(64);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                Some(command) = send_rx.recv() => {
                    let message = match command {
                        EngineSend::Audio(data) => Message::Binary(data.into()),
                        EngineSend::Json(value) => Message::Text(value.to_string().into()),
                    };
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                        if value["type"] == "session.start" {
                            let instructions =
                                value["instructions"].as_str().unwrap_or_default().to_string();
                            let _ = seen_tx.send(EngineSeen::Instructions(instructions)).await;
                            let ready = json!({"type": "session.ready", "session_id": "sess-1"});
                            if write.send(Message::Text(ready.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let _ = seen_tx.send(EngineSeen::Audio(data.to_vec())).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    });

    (url, seen_rx, send_tx)
}

fn context(call_id: Uuid, url: String) -> CallContext {
    CallContext {
        call_id,
        lead: Some(lead("lead-b", &["+15550001111"], "America/New_York")),
        agent: AgentConfig {
            url,
            api_key: "engine-key".to_string(),
            model: "conversational-v2".to_string(),
            voice: "river".to_string(),
        },
        greeting: "Hi {{first_name}}, calling about {{property_address}}.".to_string(),
        questions: vec!["Are you the owner of {{property_address}}?".to_string()],
        disqualifiers: Vec::new(),
    }
}

async fn recv_audio(seen: &mut mpsc::Receiver<EngineSeen>) -> Vec<u8> {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), seen.recv())
            .await
            .expect("engine should receive something")
            .expect("engine channel open")
        {
            EngineSeen::Audio(data) => return data,
            EngineSeen::Instructions(_) => continue,
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bridge_relays_both_directions_with_transcoding() {
    let (url, mut seen, engine) = spawn_mock_engine().await;
    let call_id = Uuid::new_v4();

    let (provider_tx, mut provider_rx) = mpsc::channel(64);
    let (events_tx, mut events_rx) = mpsc::channel(64);

    let bridge = AudioBridge::start(context(call_id, url), provider_tx, events_tx)
        .await
        .unwrap();
    assert_eq!(bridge.state(), BridgeState::Streaming);

    // The engine got the composed, substituted instructions.
    match tokio::time::timeout(Duration::from_secs(2), seen.recv())
        .await
        .unwrap()
        .unwrap()
    {
        EngineSeen::Instructions(instructions) => {
            assert!(instructions.contains("Hi Dana, calling about 12 Oak St."));
            assert!(instructions.contains("1. Are you the owner of 12 Oak St?"));
        }
        other => panic!("expected instructions first, got {other:?}"),
    }

    // Caller -> agent: 160 mu-law bytes become 320 samples (640 bytes) of
    // 16 kHz PCM.
    bridge
        .handle_provider_media(Bytes::from(mulaw_silence_frame()))
        .await;
    let caller_audio = recv_audio(&mut seen).await;
    assert_eq!(caller_audio.len(), 160 * 2 * 2);

    // Agent -> caller: 320 samples of 16 kHz PCM decimate to 160 mu-law
    // bytes.
    let agent_pcm = vec![0u8; 320 * 2];
    engine
        .send(EngineSend::Audio(agent_pcm))
        .await
        .unwrap();
    let outbound = tokio::time::timeout(Duration::from_secs(2), provider_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match outbound {
        ProviderOutbound::Media(frame) => assert_eq!(frame.len(), 160),
        other => panic!("expected media frame, got {other:?}"),
    }

    // Teardown: exactly one Closed event with the relay counters.
    bridge.close(BridgeCloseReason::ProviderStreamStopped).await;
    match tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap()
    {
        BridgeEvent::Closed { reason, stats, .. } => {
            assert_eq!(reason, BridgeCloseReason::ProviderStreamStopped);
            assert_eq!(stats.provider_frames, 1);
            assert_eq!(stats.agent_frames, 1);
        }
        other => panic!("expected closed event, got {other:?}"),
    }

    // Idempotent: a second close emits nothing further.
    bridge.close(BridgeCloseReason::Cancelled).await;
    assert!(
        tokio::time::timeout(Duration::from_millis(200), events_rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn monitors_receive_tagged_copies_without_blocking_the_relay() {
    let (url, mut seen, engine) = spawn_mock_engine().await;
    let call_id = Uuid::new_v4();

    let (provider_tx, mut provider_rx) = mpsc::channel(64);
    let (events_tx, _events_rx) = mpsc::channel(64);

    let registry = BridgeRegistry::new();
    let bridge = AudioBridge::start(context(call_id, url), provider_tx, events_tx)
        .await
        .unwrap();
    registry.register(bridge.clone());

    let (_tap_id, mut tap) = registry.attach_monitor(&call_id).unwrap();

    // Caller direction reaches the tap tagged as caller.
    bridge
        .handle_provider_media(Bytes::from(mulaw_silence_frame()))
        .await;
    let frame = tokio::time::timeout(Duration::from_secs(2), tap.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.source, SpeakerRole::Caller);
    assert_eq!(frame.sample_rate, audio::AGENT_SAMPLE_RATE);

    // Agent direction reaches the tap tagged as agent.
    engine
        .send(EngineSend::Audio(vec![0u8; 640]))
        .await
        .unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(2), tap.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.source, SpeakerRole::Agent);

    // A dead tap never blocks the relay: drop the receiver and keep
    // relaying.
    drop(tap);
    for _ in 0..4 {
        bridge
            .handle_provider_media(Bytes::from(mulaw_silence_frame()))
            .await;
    }
    // The engine still receives every frame.
    let mut engine_frames = 0;
    while engine_frames < 5 {
        let _ = recv_audio(&mut seen).await;
        engine_frames += 1;
    }

    // The primary provider leg is also unaffected.
    engine
        .send(EngineSend::Audio(vec![0u8; 640]))
        .await
        .unwrap();
    for _ in 0..2 {
        if tokio::time::timeout(Duration::from_secs(2), provider_rx.recv())
            .await
            .is_err()
        {
            panic!("provider leg stalled");
        }
    }

    bridge.close(BridgeCloseReason::ProviderStreamStopped).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn qualification_and_transcript_flow_to_the_event_channel() {
    let (url, mut seen, engine) = spawn_mock_engine().await;
    let call_id = Uuid::new_v4();

    let (provider_tx, _provider_rx) = mpsc::channel(64);
    let (events_tx, mut events_rx) = mpsc::channel(64);

    let bridge = AudioBridge::start(context(call_id, url), provider_tx, events_tx)
        .await
        .unwrap();

    // Drain the instructions message.
    let _ = tokio::time::timeout(Duration::from_secs(2), seen.recv()).await;

    engine
        .send(EngineSend::Json(json!({
            "type": "transcript",
            "role": "agent",
            "text": "Hi Dana!",
            "is_final": true,
        })))
        .await
        .unwrap();
    match tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap()
    {
        BridgeEvent::Transcript {
            call_id: id,
            role,
            text,
            is_final,
        } => {
            assert_eq!(id, call_id);
            assert_eq!(role, SpeakerRole::Agent);
            assert_eq!(text, "Hi Dana!");
            assert!(is_final);
        }
        other => panic!("expected transcript, got {other:?}"),
    }

    engine
        .send(EngineSend::Json(json!({
            "type": "qualification",
            "status": "qualified",
            "sentiment": "positive",
            "disposition": "interested",
            "answers": [{"question": "Own the home?", "answer": "yes"}],
        })))
        .await
        .unwrap();
    match tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap()
    {
        BridgeEvent::Qualification {
            call_id: id,
            qualification,
        } => {
            assert_eq!(id, call_id);
            assert_eq!(qualification.status, "qualified");
            assert_eq!(qualification.disposition.as_deref(), Some("interested"));
            assert_eq!(qualification.answers.len(), 1);
        }
        other => panic!("expected qualification, got {other:?}"),
    }

    bridge.close(BridgeCloseReason::ProviderStreamStopped).await;
}

#[tokio::test]
async fn setup_failure_sends_clear_and_reports_reason() {
    // Nothing is listening on this port.
    let (provider_tx, mut provider_rx) = mpsc::channel(8);
    let (events_tx, mut events_rx) = mpsc::channel(8);

    let result = AudioBridge::start(
        context(Uuid::new_v4(), "ws://127.0.0.1:1/nowhere".to_string()),
        provider_tx,
        events_tx,
    )
    .await;
    assert!(result.is_err());

    assert!(matches!(
        provider_rx.recv().await,
        Some(ProviderOutbound::Clear)
    ));
    match events_rx.recv().await {
        Some(BridgeEvent::Closed { reason, .. }) => {
            assert!(matches!(reason, BridgeCloseReason::SetupFailed(_)));
        }
        other => panic!("expected closed event, got {other:?}"),
    }
}
