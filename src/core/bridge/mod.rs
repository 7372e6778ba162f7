//! Real-time audio bridge between a telephony media stream and the voice-AI
//! engine.
//!
//! One bridge serves one answered call. The provider leg (vendor media
//! WebSocket) is owned by the media handler; the bridge owns the agent leg
//! and all transcoding between them. Monitor taps receive tagged copies of
//! both directions on a strictly best-effort basis: a slow tap is dropped,
//! never waited on.
//!
//! The bridge never retries anything. If the agent leg cannot be set up the
//! session closes with an inspectable reason and the retry decision is made
//! by the scheduler.

pub mod registry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::agent::{
    AgentClient, AgentConfig, AgentTranscript, Qualification, SpeakerRole,
};
use crate::core::audio;
use crate::core::sessions::LeadProfile;
use crate::utils::template::substitute_lead_vars;

pub use registry::BridgeRegistry;

/// Capacity of a monitor tap channel. A tap that falls this far behind the
/// live call is dropped.
const MONITOR_TAP_CAPACITY: usize = 64;

// =============================================================================
// States, Reasons, Errors
// =============================================================================

/// Bridge session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Closing,
    Error,
    Closed,
}

/// Why a bridge session ended. Inspectable by operators and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCloseReason {
    /// The vendor sent its stream-stop message
    ProviderStreamStopped,
    /// The provider socket failed mid-call
    ProviderSocketError,
    /// The engine leg could not be established
    SetupFailed(String),
    /// The engine closed its side mid-call
    AgentClosed,
    /// The call was cancelled from our side (operator hangup, end_call)
    Cancelled,
}

impl std::fmt::Display for BridgeCloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeCloseReason::ProviderStreamStopped => write!(f, "provider_stream_stopped"),
            BridgeCloseReason::ProviderSocketError => write!(f, "provider_socket_error"),
            BridgeCloseReason::SetupFailed(msg) => write!(f, "setup_failed: {msg}"),
            BridgeCloseReason::AgentClosed => write!(f, "agent_closed"),
            BridgeCloseReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bridge setup failed: {0}")]
    SetupFailed(String),

    #[error("No active bridge for call {0}")]
    NotFound(Uuid),
}

// =============================================================================
// Frames and Events
// =============================================================================

/// Frames the bridge hands to the provider-socket writer task.
#[derive(Debug, Clone)]
pub enum ProviderOutbound {
    /// mu-law 8 kHz audio for the callee
    Media(Bytes),
    /// Tell the vendor to drop any buffered, not-yet-played audio
    Clear,
}

/// One tagged frame delivered to monitor taps.
#[derive(Debug, Clone)]
pub struct MonitorFrame {
    pub source: SpeakerRole,
    /// PCM16 little-endian mono
    pub payload: Bytes,
    pub sample_rate: u32,
}

/// Per-direction relay counters.
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub provider_frames: AtomicU64,
    pub provider_bytes: AtomicU64,
    pub agent_frames: AtomicU64,
    pub agent_bytes: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`], attached to the closed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BridgeStatsSnapshot {
    pub provider_frames: u64,
    pub provider_bytes: u64,
    pub agent_frames: u64,
    pub agent_bytes: u64,
}

impl BridgeStats {
    fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            provider_frames: self.provider_frames.load(Ordering::Relaxed),
            provider_bytes: self.provider_bytes.load(Ordering::Relaxed),
            agent_frames: self.agent_frames.load(Ordering::Relaxed),
            agent_bytes: self.agent_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Events published by a bridge to the channel registered at construction.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Transcript {
        call_id: Uuid,
        role: SpeakerRole,
        text: String,
        is_final: bool,
    },
    Qualification {
        call_id: Uuid,
        qualification: Qualification,
    },
    /// Emitted exactly once per bridge.
    Closed {
        call_id: Uuid,
        reason: BridgeCloseReason,
        duration_secs: u64,
        stats: BridgeStatsSnapshot,
    },
}

// =============================================================================
// Call Context
// =============================================================================

/// Action taken when a disqualifying phrase is heard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisqualifierAction {
    /// Wrap up the conversation politely and hang up
    EndPolitely,
    /// Record the lead as disqualified, then hang up
    MarkDisqualified,
}

/// One disqualifying trigger phrase and what to do about it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DisqualifierRule {
    pub phrase: String,
    pub action: DisqualifierAction,
}

/// Everything the bridge needs to open a session for one call: engine
/// credentials, script, and the lead for template substitution.
#[derive(Clone)]
pub struct CallContext {
    pub call_id: Uuid,
    pub lead: Option<LeadProfile>,
    pub agent: AgentConfig,
    pub greeting: String,
    pub questions: Vec<String>,
    pub disqualifiers: Vec<DisqualifierRule>,
}

impl CallContext {
    /// Compose the engine instruction block: system behavior, the greeting,
    /// the ordered qualifying questions, and the disqualifying triggers.
    pub fn compose_instructions(&self) -> String {
        let lead = self.lead.as_ref();
        let mut out = String::new();

        out.push_str(
            "You are a friendly outbound calling assistant. Keep responses short and \
             conversational; you are on a phone call.\n",
        );
        out.push_str("Open with exactly this greeting: \"");
        out.push_str(&substitute_lead_vars(&self.greeting, lead));
        out.push_str("\"\n");

        if !self.questions.is_empty() {
            out.push_str("Ask these qualifying questions one at a time, in order:\n");
            for (i, question) in self.questions.iter().enumerate() {
                out.push_str(&format!(
                    "{}. {}\n",
                    i + 1,
                    substitute_lead_vars(question, lead)
                ));
            }
        }

        for rule in &self.disqualifiers {
            let action = match rule.action {
                DisqualifierAction::EndPolitely => "end the call politely",
                DisqualifierAction::MarkDisqualified => {
                    "mark the lead disqualified and end the call"
                }
            };
            out.push_str(&format!(
                "If the caller says \"{}\" or equivalent, {}.\n",
                rule.phrase, action
            ));
        }

        out
    }
}

// =============================================================================
// Bridge
// =============================================================================

/// One live relay session.
pub struct AudioBridge {
    call_id: Uuid,
    state: RwLock<BridgeState>,
    provider_tx: mpsc::Sender<ProviderOutbound>,
    agent: AgentClient,
    taps: DashMap<Uuid, mpsc::Sender<MonitorFrame>>,
    stats: Arc<BridgeStats>,
    events: mpsc::Sender<BridgeEvent>,
    cancel: CancellationToken,
    close_emitted: AtomicBool,
    started: Instant,
}

impl AudioBridge {
    /// Set up the session for an answered call.
    ///
    /// `provider_tx` must already be wired to the provider socket's writer:
    /// the engine may emit greeting audio the instant the session is
    /// accepted, and attaching the provider leg late clips the greeting.
    ///
    /// On any setup failure the provider socket is told to clear buffered
    /// audio, a `Closed` event with an inspectable reason is emitted, and an
    /// error is returned. No retry happens here.
    pub async fn start(
        context: CallContext,
        provider_tx: mpsc::Sender<ProviderOutbound>,
        events: mpsc::Sender<BridgeEvent>,
    ) -> Result<Arc<Self>, BridgeError> {
        let call_id = context.call_id;

        let agent = match AgentClient::new(context.agent.clone()) {
            Ok(agent) => agent,
            Err(e) => {
                let reason = BridgeCloseReason::SetupFailed(e.to_string());
                Self::abort_setup(&provider_tx, &events, call_id, &reason).await;
                return Err(BridgeError::SetupFailed(e.to_string()));
            }
        };

        let bridge = Arc::new(Self {
            call_id,
            state: RwLock::new(BridgeState::Connecting),
            provider_tx: provider_tx.clone(),
            agent,
            taps: DashMap::new(),
            stats: Arc::new(BridgeStats::default()),
            events: events.clone(),
            cancel: CancellationToken::new(),
            close_emitted: AtomicBool::new(false),
            started: Instant::now(),
        });

        bridge.register_agent_callbacks().await;

        let instructions = context.compose_instructions();
        if let Err(e) = bridge
            .agent
            .connect(instructions, audio::AGENT_SAMPLE_RATE)
            .await
        {
            let reason = BridgeCloseReason::SetupFailed(e.to_string());
            *bridge.state.write() = BridgeState::Error;
            Self::abort_setup(&provider_tx, &events, call_id, &reason).await;
            bridge.close_emitted.store(true, Ordering::SeqCst);
            return Err(BridgeError::SetupFailed(e.to_string()));
        }

        *bridge.state.write() = BridgeState::Streaming;
        info!(%call_id, "Audio bridge streaming");
        Ok(bridge)
    }

    async fn abort_setup(
        provider_tx: &mpsc::Sender<ProviderOutbound>,
        events: &mpsc::Sender<BridgeEvent>,
        call_id: Uuid,
        reason: &BridgeCloseReason,
    ) {
        warn!(%call_id, %reason, "Bridge setup failed");
        let _ = provider_tx.send(ProviderOutbound::Clear).await;
        let _ = events
            .send(BridgeEvent::Closed {
                call_id,
                reason: reason.clone(),
                duration_secs: 0,
                stats: BridgeStatsSnapshot {
                    provider_frames: 0,
                    provider_bytes: 0,
                    agent_frames: 0,
                    agent_bytes: 0,
                },
            })
            .await;
    }

    async fn register_agent_callbacks(self: &Arc<Self>) {
        // Agent audio: decimate to 8 kHz, mu-law encode, forward to the
        // callee, and tap a PCM copy for monitors.
        let provider_tx = self.provider_tx.clone();
        let stats = self.stats.clone();
        let weak = Arc::downgrade(self);
        self.agent
            .on_audio(Arc::new(move |pcm: Bytes| {
                let provider_tx = provider_tx.clone();
                let stats = stats.clone();
                let weak = weak.clone();
                Box::pin(async move {
                    stats.agent_frames.fetch_add(1, Ordering::Relaxed);
                    stats.agent_bytes.fetch_add(pcm.len() as u64, Ordering::Relaxed);

                    if let Some(bridge) = weak.upgrade() {
                        bridge.tap_broadcast(MonitorFrame {
                            source: SpeakerRole::Agent,
                            payload: pcm.clone(),
                            sample_rate: audio::AGENT_SAMPLE_RATE,
                        });
                    }

                    let converted = audio::agent_to_provider(&pcm);
                    let frame = if converted.is_empty() && !pcm.is_empty() {
                        // Conversion produced nothing usable; forward the
                        // original rather than dropping the frame.
                        debug!("Agent audio conversion fell back to pass-through");
                        pcm
                    } else {
                        Bytes::from(converted)
                    };
                    if provider_tx.send(ProviderOutbound::Media(frame)).await.is_err() {
                        debug!("Provider socket gone, dropping agent audio");
                    }
                })
            }))
            .await;

        // Transcript and qualification flow to the orchestrator's channel.
        let events = self.events.clone();
        let call_id = self.call_id;
        self.agent
            .on_transcript(Arc::new(move |t: AgentTranscript| {
                let events = events.clone();
                Box::pin(async move {
                    let _ = events
                        .send(BridgeEvent::Transcript {
                            call_id,
                            role: t.role,
                            text: t.text,
                            is_final: t.is_final,
                        })
                        .await;
                })
            }))
            .await;

        let events = self.events.clone();
        self.agent
            .on_qualification(Arc::new(move |q: Qualification| {
                let events = events.clone();
                Box::pin(async move {
                    let _ = events
                        .send(BridgeEvent::Qualification {
                            call_id,
                            qualification: q,
                        })
                        .await;
                })
            }))
            .await;

        self.agent
            .on_error(Arc::new(move |e| {
                Box::pin(async move {
                    warn!(%call_id, error = %e, "Agent leg error");
                })
            }))
            .await;

        // Engine hangup mid-call: cancel so the media handler tears down.
        let cancel = self.cancel.clone();
        self.agent
            .on_closed(Arc::new(move || {
                let cancel = cancel.clone();
                Box::pin(async move {
                    cancel.cancel();
                })
            }))
            .await;
    }

    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    pub fn state(&self) -> BridgeState {
        *self.state.read()
    }

    /// Token cancelled when either leg wants the session torn down.
    pub fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats_snapshot(&self) -> BridgeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Relay one inbound media frame from the provider (mu-law, 8 kHz).
    pub async fn handle_provider_media(&self, payload: Bytes) {
        if self.state() != BridgeState::Streaming {
            return;
        }

        self.stats.provider_frames.fetch_add(1, Ordering::Relaxed);
        self.stats
            .provider_bytes
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        let converted = audio::provider_to_agent(&payload);
        let (frame, sample_rate) = if converted.is_empty() && !payload.is_empty() {
            debug!("Caller audio conversion fell back to pass-through");
            (payload, audio::PROVIDER_SAMPLE_RATE)
        } else {
            (Bytes::from(converted), audio::AGENT_SAMPLE_RATE)
        };

        self.tap_broadcast(MonitorFrame {
            source: SpeakerRole::Caller,
            payload: frame.clone(),
            sample_rate,
        });

        if let Err(e) = self.agent.send_audio(frame).await {
            debug!(error = %e, "Dropping caller audio frame");
        }
    }

    /// The vendor delivered a DTMF digit. Surfaced in the log only; the
    /// engine hears the tone in-band.
    pub fn handle_dtmf(&self, digit: &str) {
        info!(call_id = %self.call_id, digit, "DTMF received");
    }

    /// Attach a live monitor. Never affects primary delivery.
    pub fn attach_monitor(&self) -> (Uuid, mpsc::Receiver<MonitorFrame>) {
        let (tx, rx) = mpsc::channel(MONITOR_TAP_CAPACITY);
        let tap_id = Uuid::new_v4();
        self.taps.insert(tap_id, tx);
        info!(call_id = %self.call_id, %tap_id, "Monitor attached");
        (tap_id, rx)
    }

    pub fn detach_monitor(&self, tap_id: &Uuid) {
        if self.taps.remove(tap_id).is_some() {
            info!(call_id = %self.call_id, %tap_id, "Monitor detached");
        }
    }

    /// Best-effort fan-out to monitors. A full or closed tap is removed on
    /// the spot; the relay never waits on a monitor.
    fn tap_broadcast(&self, frame: MonitorFrame) {
        if self.taps.is_empty() {
            return;
        }
        self.taps.retain(|tap_id, tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(call_id = %self.call_id, %tap_id, "Monitor tap lagging, dropping it");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Tear the session down. Idempotent; the `Closed` event is emitted
    /// exactly once, by whichever caller gets here first.
    pub async fn close(&self, reason: BridgeCloseReason) {
        if self.close_emitted.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.state.write() = BridgeState::Closing;
        self.agent.disconnect().await;

        let duration_secs = self.started.elapsed().as_secs();
        let stats = self.stats.snapshot();
        info!(
            call_id = %self.call_id,
            %reason,
            duration_secs,
            provider_frames = stats.provider_frames,
            agent_frames = stats.agent_frames,
            "Audio bridge closed"
        );

        let final_state = match reason {
            BridgeCloseReason::ProviderSocketError | BridgeCloseReason::SetupFailed(_) => {
                BridgeState::Error
            }
            _ => BridgeState::Closed,
        };

        let _ = self
            .events
            .send(BridgeEvent::Closed {
                call_id: self.call_id,
                reason,
                duration_secs,
                stats,
            })
            .await;

        self.taps.clear();
        *self.state.write() = final_state;
        self.cancel.cancel();
    }
}
