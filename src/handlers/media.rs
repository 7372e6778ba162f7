//! Vendor media-stream WebSocket handler.
//!
//! Telephony vendors open a WebSocket to `/media/{provider}` for every
//! answered call and stream mu-law audio frames over it. This handler owns
//! the provider leg: it parses the vendor dialect into the normalized
//! stream messages, creates the bridge on the `start` envelope, pumps
//! caller audio into it, and writes the bridge's outbound frames back in
//! the vendor's dialect.
//!
//! The provider writer channel is wired up BEFORE the bridge opens the
//! agent leg: the engine may emit greeting audio the moment the session is
//! accepted, and attaching the writer late audibly clips it.

use std::sync::Arc;

use axum::{
    Extension,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::bridge::{AudioBridge, BridgeCloseReason, ProviderOutbound};
use crate::core::telephony::{
    MediaStreamMessage, MediaTrack, TelephonyProvider, outbound_clear_frame,
    outbound_media_frame, parse_media_message,
};
use crate::middleware::ConnectionSlot;
use crate::state::AppState;

/// Capacity of the channel from the bridge to the provider socket writer.
const PROVIDER_WRITE_CAPACITY: usize = 256;

/// `GET /media/{provider}` — WebSocket upgrade for a vendor media stream.
pub async fn media_handler(
    ws: WebSocketUpgrade,
    Path(provider): Path<String>,
    State(state): State<Arc<AppState>>,
    slot: Option<Extension<ConnectionSlot>>,
) -> Response {
    let Some(provider) = state.provider_from_path(&provider) else {
        return (StatusCode::NOT_FOUND, "Unknown media provider").into_response();
    };

    ws.on_upgrade(move |socket| async move {
        // Hold the connection slot for the socket's lifetime.
        let _slot = slot;
        handle_media_socket(socket, state, provider).await;
    })
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>, provider: TelephonyProvider) {
    debug!(%provider, "Vendor media socket connected");

    let (sender, mut receiver) = socket.split();
    let mut leg: Option<ProviderLeg> = None;
    let mut sender = Some(sender);

    let close_reason = loop {
        // Owned token so the select arm bodies can mutate `leg` freely.
        let cancel_token = leg.as_ref().map(|l| l.bridge.cancelled());
        let cancelled = async {
            match cancel_token {
                Some(token) => token.cancelled_owned().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = cancelled => break BridgeCloseReason::AgentClosed,

            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match parse_media_message(provider, &text) {
                        MediaStreamMessage::Start { provider_call_id, stream_id, format } => {
                            if leg.is_some() {
                                debug!(%provider, "Duplicate start frame, ignoring");
                                continue;
                            }
                            let Some(sink) = sender.take() else { continue };
                            match open_leg(&state, provider, &provider_call_id, stream_id, format, sink)
                                .await
                            {
                                Some(opened) => leg = Some(opened),
                                None => break BridgeCloseReason::SetupFailed(
                                    "bridge setup failed".to_string(),
                                ),
                            }
                        }
                        MediaStreamMessage::Media { track: MediaTrack::Inbound, payload } => {
                            if let Some(leg) = &leg {
                                leg.bridge.handle_provider_media(payload).await;
                            }
                        }
                        // The vendor echoing our own audio back.
                        MediaStreamMessage::Media { track: MediaTrack::Outbound, .. } => {}
                        MediaStreamMessage::Dtmf { digit } => {
                            if let Some(leg) = &leg {
                                leg.bridge.handle_dtmf(&digit);
                            }
                        }
                        MediaStreamMessage::Stop => break BridgeCloseReason::ProviderStreamStopped,
                        MediaStreamMessage::Mark { .. } | MediaStreamMessage::Ignored => {}
                    }
                }
                // Vendors frame everything as text; binary is unexpected.
                Some(Ok(Message::Binary(_))) => {
                    debug!(%provider, "Unexpected binary frame on media socket");
                }
                Some(Ok(Message::Close(_))) | None => {
                    break BridgeCloseReason::ProviderStreamStopped;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%provider, error = %e, "Media socket error");
                    break BridgeCloseReason::ProviderSocketError;
                }
            },
        }
    };

    if let Some(leg) = leg {
        leg.bridge.close(close_reason).await;
        leg.writer.abort();
    }
    debug!(%provider, "Vendor media socket finished");
}

struct ProviderLeg {
    bridge: Arc<AudioBridge>,
    writer: tokio::task::JoinHandle<()>,
}

/// Resolve the call, wire the writer, and open the bridge for one stream.
async fn open_leg(
    state: &Arc<AppState>,
    provider: TelephonyProvider,
    provider_call_id: &str,
    stream_id: String,
    format: crate::core::telephony::MediaFormat,
    sink: SplitSink<WebSocket, Message>,
) -> Option<ProviderLeg> {
    let Some(session) = state.store.session_by_provider_id(provider_call_id) else {
        // Start can race the initiation bookkeeping, but by stream time the
        // session should exist; without one there is no context to bridge.
        warn!(%provider, provider_call_id, "Media stream for unknown call, closing");
        return None;
    };

    info!(
        call_id = %session.call_id,
        %provider,
        stream_id = %stream_id,
        encoding = %format.encoding,
        sample_rate = format.sample_rate,
        "Media stream started"
    );

    let (provider_tx, provider_rx) = mpsc::channel(PROVIDER_WRITE_CAPACITY);
    let writer = tokio::spawn(provider_writer(provider, stream_id, provider_rx, sink));

    let context = state.call_context(session.call_id, &session.lead_id);
    match AudioBridge::start(context, provider_tx, state.bridge_events.clone()).await {
        Ok(bridge) => {
            state.registry().register(bridge.clone());
            Some(ProviderLeg { bridge, writer })
        }
        Err(e) => {
            warn!(call_id = %session.call_id, error = %e, "Bridge setup failed");
            // Let the queued clear frame drain before the socket drops.
            tokio::task::yield_now().await;
            writer.abort();
            None
        }
    }
}

/// Forward bridge output to the vendor socket in the vendor's dialect.
async fn provider_writer(
    provider: TelephonyProvider,
    stream_id: String,
    mut rx: mpsc::Receiver<ProviderOutbound>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(frame) = rx.recv().await {
        let text = match frame {
            ProviderOutbound::Media(payload) => {
                outbound_media_frame(provider, &stream_id, &payload)
            }
            ProviderOutbound::Clear => outbound_clear_frame(provider, &stream_id),
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            debug!(%provider, "Media socket writer closed");
            break;
        }
    }
}
