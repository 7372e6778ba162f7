//! WebSocket client for the voice-AI engine.
//!
//! One client instance serves one call. The connection task owns the socket;
//! the bridge talks to it through an mpsc sender and receives engine output
//! through callbacks registered before [`AgentClient::connect`].
//!
//! There is deliberately no reconnection here: if the engine leg drops, the
//! bridge closes and the retry decision is made upstream by the scheduler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use super::messages::{AgentClientEvent, AgentServerEvent, Qualification, SpeakerRole};

/// Channel capacity for frames headed to the engine.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Errors from the engine connection.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Engine error: {0}")]
    EngineError(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Connection settings for the engine.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// WebSocket URL of the engine
    pub url: String,
    /// Bearer token
    pub api_key: String,
    /// Engine model id
    pub model: String,
    /// Voice id for synthesized speech
    pub voice: String,
}

impl AgentConfig {
    pub fn validate(&self) -> AgentResult<()> {
        if self.url.is_empty() {
            return Err(AgentError::InvalidConfiguration(
                "Engine URL is required".to_string(),
            ));
        }
        if self.api_key.is_empty() {
            return Err(AgentError::InvalidConfiguration(
                "Engine API key is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// A finalized or partial transcript line from the engine.
#[derive(Debug, Clone)]
pub struct AgentTranscript {
    pub role: SpeakerRole,
    pub text: String,
    pub is_final: bool,
}

pub type AgentAudioCallback =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
pub type AgentTranscriptCallback =
    Arc<dyn Fn(AgentTranscript) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
pub type AgentQualificationCallback =
    Arc<dyn Fn(Qualification) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
pub type AgentErrorCallback =
    Arc<dyn Fn(AgentError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
pub type AgentClosedCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

enum OutboundFrame {
    Audio(Bytes),
    Event(AgentClientEvent),
}

/// Voice-AI engine WebSocket client.
pub struct AgentClient {
    config: AgentConfig,
    connected: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<OutboundFrame>>>>,

    audio_callback: Arc<Mutex<Option<AgentAudioCallback>>>,
    transcript_callback: Arc<Mutex<Option<AgentTranscriptCallback>>>,
    qualification_callback: Arc<Mutex<Option<AgentQualificationCallback>>>,
    error_callback: Arc<Mutex<Option<AgentErrorCallback>>>,
    closed_callback: Arc<Mutex<Option<AgentClosedCallback>>>,

    connection_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AgentClient {
    pub fn new(config: AgentConfig) -> AgentResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
            ready: Arc::new(AtomicBool::new(false)),
            ws_sender: Arc::new(Mutex::new(None)),
            audio_callback: Arc::new(Mutex::new(None)),
            transcript_callback: Arc::new(Mutex::new(None)),
            qualification_callback: Arc::new(Mutex::new(None)),
            error_callback: Arc::new(Mutex::new(None)),
            closed_callback: Arc::new(Mutex::new(None)),
            connection_handle: Arc::new(Mutex::new(None)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether the engine has acknowledged the session.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn on_audio(&self, callback: AgentAudioCallback) {
        *self.audio_callback.lock().await = Some(callback);
    }

    pub async fn on_transcript(&self, callback: AgentTranscriptCallback) {
        *self.transcript_callback.lock().await = Some(callback);
    }

    pub async fn on_qualification(&self, callback: AgentQualificationCallback) {
        *self.qualification_callback.lock().await = Some(callback);
    }

    pub async fn on_error(&self, callback: AgentErrorCallback) {
        *self.error_callback.lock().await = Some(callback);
    }

    pub async fn on_closed(&self, callback: AgentClosedCallback) {
        *self.closed_callback.lock().await = Some(callback);
    }

    /// Connect and open a session with the composed instructions.
    ///
    /// Returns once the socket is up and the session request is queued; the
    /// `session.ready` acknowledgment arrives asynchronously and flips
    /// [`AgentClient::is_ready`]. Audio may be sent immediately — the engine
    /// buffers until the session is accepted.
    pub async fn connect(&self, instructions: String, sample_rate: u32) -> AgentResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let request = http::Request::builder()
            .uri(&self.config.url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host_of(&self.config.url))
            .body(())
            .map_err(|e| AgentError::ConnectionFailed(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| AgentError::ConnectionFailed(e.to_string()))?;

        tracing::info!(url = %self.config.url, "Connected to voice-AI engine");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<OutboundFrame>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock().await = Some(tx);

        let audio_cb = self.audio_callback.clone();
        let transcript_cb = self.transcript_callback.clone();
        let qualification_cb = self.qualification_callback.clone();
        let error_cb = self.error_callback.clone();
        let closed_cb = self.closed_callback.clone();
        let connected = self.connected.clone();
        let ready = self.ready.clone();
        let ws_sender = self.ws_sender.clone();

        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(frame) = rx.recv() => {
                        let message = match frame {
                            OutboundFrame::Audio(data) => Message::Binary(data),
                            OutboundFrame::Event(event) => match serde_json::to_string(&event) {
                                Ok(json) => Message::Text(json.into()),
                                Err(e) => {
                                    tracing::error!("Failed to serialize engine event: {e}");
                                    continue;
                                }
                            },
                        };
                        if let Err(e) = ws_sink.send(message).await {
                            tracing::error!("Failed to send to engine: {e}");
                            break;
                        }
                    }

                    Some(msg) = ws_stream.next() => {
                        match msg {
                            Ok(Message::Binary(data)) => {
                                if let Some(cb) = audio_cb.lock().await.as_ref() {
                                    cb(data).await;
                                }
                            }
                            Ok(Message::Text(text)) => {
                                match serde_json::from_str::<AgentServerEvent>(&text) {
                                    Ok(event) => {
                                        Self::handle_server_event(
                                            event,
                                            &ready,
                                            &transcript_cb,
                                            &qualification_cb,
                                            &error_cb,
                                        ).await;
                                    }
                                    Err(e) => {
                                        tracing::warn!("Failed to parse engine event: {e} - {text}");
                                    }
                                }
                            }
                            Ok(Message::Ping(data)) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong to engine: {e}");
                                }
                            }
                            Ok(Message::Close(_)) => {
                                tracing::info!("Engine closed the connection");
                                break;
                            }
                            Err(e) => {
                                tracing::error!("Engine WebSocket error: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }

                    else => break,
                }
            }

            connected.store(false, Ordering::SeqCst);
            ready.store(false, Ordering::SeqCst);
            *ws_sender.lock().await = None;
            if let Some(cb) = closed_cb.lock().await.as_ref() {
                cb().await;
            }
            tracing::debug!("Engine connection task ended");
        });

        *self.connection_handle.lock().await = Some(handle);

        self.send_event(AgentClientEvent::SessionStart {
            instructions,
            voice: self.config.voice.clone(),
            model: self.config.model.clone(),
            sample_rate,
        })
        .await
    }

    async fn handle_server_event(
        event: AgentServerEvent,
        ready: &Arc<AtomicBool>,
        transcript_cb: &Arc<Mutex<Option<AgentTranscriptCallback>>>,
        qualification_cb: &Arc<Mutex<Option<AgentQualificationCallback>>>,
        error_cb: &Arc<Mutex<Option<AgentErrorCallback>>>,
    ) {
        match event {
            AgentServerEvent::SessionReady { session_id } => {
                tracing::info!(session_id, "Engine session ready");
                ready.store(true, Ordering::SeqCst);
            }
            AgentServerEvent::Transcript { role, text, is_final } => {
                if let Some(cb) = transcript_cb.lock().await.as_ref() {
                    cb(AgentTranscript { role, text, is_final }).await;
                }
            }
            AgentServerEvent::Qualification(qualification) => {
                tracing::info!(status = %qualification.status, "Engine qualification received");
                if let Some(cb) = qualification_cb.lock().await.as_ref() {
                    cb(qualification).await;
                }
            }
            AgentServerEvent::Error { code, message } => {
                tracing::error!(?code, message, "Engine reported error");
                if let Some(cb) = error_cb.lock().await.as_ref() {
                    cb(AgentError::EngineError(message)).await;
                }
            }
        }
    }

    /// Send caller audio (PCM16, 16 kHz, mono, little-endian).
    pub async fn send_audio(&self, audio: Bytes) -> AgentResult<()> {
        let sender = self.ws_sender.lock().await;
        let Some(tx) = sender.as_ref() else {
            return Err(AgentError::NotConnected);
        };
        tx.send(OutboundFrame::Audio(audio))
            .await
            .map_err(|_| AgentError::NotConnected)
    }

    async fn send_event(&self, event: AgentClientEvent) -> AgentResult<()> {
        let sender = self.ws_sender.lock().await;
        let Some(tx) = sender.as_ref() else {
            return Err(AgentError::NotConnected);
        };
        tx.send(OutboundFrame::Event(event))
            .await
            .map_err(|_| AgentError::NotConnected)
    }

    /// Close the session and tear down the socket.
    pub async fn disconnect(&self) {
        // Best effort: the engine may already be gone.
        let _ = self.send_event(AgentClientEvent::SessionEnd).await;

        *self.ws_sender.lock().await = None;
        if let Some(handle) = self.connection_handle.lock().await.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from voice-AI engine");
    }
}

/// Extract the Host header value from a ws:// or wss:// URL.
fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AgentConfig {
        AgentConfig {
            url: "wss://engine.example/v1/stream".to_string(),
            api_key: "key".to_string(),
            model: "conversational-v2".to_string(),
            voice: "river".to_string(),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());

        let mut missing_url = config();
        missing_url.url = String::new();
        assert!(missing_url.validate().is_err());

        let mut missing_key = config();
        missing_key.api_key = String::new();
        assert!(missing_key.validate().is_err());
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(host_of("wss://engine.example/v1"), "engine.example");
        assert_eq!(host_of("not a url"), "localhost");
    }

    #[tokio::test]
    async fn test_send_audio_requires_connection() {
        let client = AgentClient::new(config()).unwrap();
        assert!(!client.is_connected());
        assert!(matches!(
            client.send_audio(Bytes::from_static(&[0, 0])).await,
            Err(AgentError::NotConnected)
        ));
    }
}
