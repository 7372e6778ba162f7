//! Live listen-in WebSocket handler.
//!
//! Operators attach to `/monitor/{call_id}` and receive tagged copies of
//! both audio directions as JSON frames. Delivery is strictly best-effort:
//! the tap channel is bounded and the bridge drops a lagging tap rather
//! than ever waiting on it, so attaching and detaching monitors cannot
//! perturb the live call.

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
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::bridge::MonitorFrame;
use crate::middleware::ConnectionSlot;
use crate::state::AppState;

/// `GET /monitor/{call_id}` — attach a read-only tap to a live call.
///
/// Unknown or no-longer-active call ids are rejected with 404 before the
/// upgrade; a monitor cannot create or prolong a session.
pub async fn monitor_handler(
    ws: WebSocketUpgrade,
    Path(call_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
    slot: Option<Extension<ConnectionSlot>>,
) -> Response {
    let Ok((tap_id, rx)) = state.registry().attach_monitor(&call_id) else {
        return (StatusCode::NOT_FOUND, "No active call with that id").into_response();
    };

    ws.on_upgrade(move |socket| async move {
        let _slot = slot;
        run_monitor(socket, state, call_id, tap_id, rx).await;
    })
}

async fn run_monitor(
    socket: WebSocket,
    state: Arc<AppState>,
    call_id: Uuid,
    tap_id: Uuid,
    mut rx: mpsc::Receiver<MonitorFrame>,
) {
    info!(%call_id, %tap_id, "Monitor attached");
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if sender.send(Message::Text(encode_frame(&frame).into())).await.is_err() {
                        break;
                    }
                }
                // Bridge closed (or dropped this tap for lagging).
                None => break,
            },

            // Monitors only read; any close or error from the client ends
            // the tap.
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    if let Some(bridge) = state.registry().get(&call_id) {
        bridge.detach_monitor(&tap_id);
    }
    let _ = sender.send(Message::Close(None)).await;
    debug!(%call_id, %tap_id, "Monitor detached");
}

fn encode_frame(frame: &MonitorFrame) -> String {
    json!({
        "source": frame.source,
        "payload": BASE64.encode(&frame.payload),
        "sample_rate": frame.sample_rate,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::SpeakerRole;
    use bytes::Bytes;

    #[test]
    fn test_encode_frame() {
        let encoded = encode_frame(&MonitorFrame {
            source: SpeakerRole::Caller,
            payload: Bytes::from_static(&[1, 2, 3]),
            sample_rate: 16_000,
        });
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["source"], "caller");
        assert_eq!(value["sample_rate"], 16_000);
        assert_eq!(
            BASE64.decode(value["payload"].as_str().unwrap()).unwrap(),
            vec![1, 2, 3]
        );
    }
}
