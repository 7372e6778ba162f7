//! Call orchestration: webhook ingestion, session bookkeeping, and the glue
//! between normalized events, the scheduler, and live bridges.
//!
//! The orchestrator owns the session store, the bridge registry, and the
//! bridge event channel. Webhook ingestion is deliberately forgiving: an
//! event for an unknown call is a benign no-op (it may have raced the
//! initiation bookkeeping), duplicates are absorbed by first-write-wins
//! guards in the store, and a processing failure never propagates back to
//! the vendor response path.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::bridge::{BridgeCloseReason, BridgeEvent, BridgeRegistry};
use crate::core::scheduler::Scheduler;
use crate::core::sessions::{SessionStore, TranscriptLine, WebhookAuditRecord};
use crate::core::telephony::{
    CallEvent, CallStatus, EndOutcome, EndReason, ProviderSet, RawWebhook, TelephonyError,
    TelephonyProvider, TelephonyResult,
};

/// Capacity of the shared bridge event channel.
const BRIDGE_EVENT_CAPACITY: usize = 256;

pub struct Orchestrator {
    store: Arc<SessionStore>,
    scheduler: Arc<Scheduler>,
    registry: Arc<BridgeRegistry>,
    providers: Arc<ProviderSet>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        scheduler: Arc<Scheduler>,
        registry: Arc<BridgeRegistry>,
        providers: Arc<ProviderSet>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            scheduler,
            registry,
            providers,
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<BridgeRegistry> {
        &self.registry
    }

    /// Normalize and apply one raw webhook delivery.
    ///
    /// Infallible by design: anything that goes wrong is logged and
    /// swallowed so the HTTP layer can always acknowledge the vendor.
    pub async fn ingest_webhook(&self, provider: TelephonyProvider, raw: RawWebhook) {
        let Some(adapter) = self.providers.get(provider) else {
            warn!(%provider, "Webhook for unconfigured provider, ignoring");
            return;
        };
        let event = adapter.map_event(&raw);
        self.handle_event(event).await;
    }

    /// Apply one normalized event to its session and, on the first terminal
    /// transition, feed the outcome to the scheduler and tear down any live
    /// bridge.
    pub async fn handle_event(&self, event: CallEvent) {
        let result = self.store.apply_event(&event);

        let outcome_label = match &result {
            None => "unmatched",
            Some((_, o)) if o.became_terminal => "applied",
            Some((_, o)) if o.applied => "applied",
            Some(_) => "duplicate",
        };
        self.store.record_webhook(WebhookAuditRecord {
            provider: event.provider,
            event_id: event.event_id.clone(),
            provider_call_id: event.provider_call_id.clone(),
            event_type: event.event_type,
            status: event.status,
            received_at: Utc::now(),
            outcome: outcome_label.to_string(),
        });

        let Some((call_id, outcome)) = result else {
            // The association may not be persisted yet, or the vendor is
            // re-delivering history for an archived call.
            debug!(
                provider_call_id = %event.provider_call_id,
                event_id = %event.event_id,
                "Event matched no call record, ignoring"
            );
            return;
        };

        if !outcome.became_terminal {
            return;
        }

        // First terminal transition: default the disposition for
        // unsuccessful endings, hand the outcome to the scheduler, and close
        // any bridge still attached to the call.
        if let Some(disposition) = default_disposition(event.status) {
            self.store.set_disposition(&call_id, disposition);
        }

        if let Some(session) = self.store.session(&call_id) {
            info!(
                %call_id,
                status = %session.status,
                "Call reached terminal status"
            );
            self.scheduler.handle_outcome(&session);
        }

        self.registry
            .force_close(&call_id, BridgeCloseReason::ProviderStreamStopped)
            .await;
    }

    /// Hang up a call from our side and force-close both legs of its bridge.
    pub async fn end_call(&self, call_id: &Uuid, reason: EndReason) -> TelephonyResult<EndOutcome> {
        let session = self
            .store
            .session(call_id)
            .ok_or_else(|| TelephonyError::not_found(format!("No call session {call_id}")))?;

        let adapter = self.providers.get(session.provider).ok_or_else(|| {
            TelephonyError::configuration(format!(
                "Provider {} not configured",
                session.provider
            ))
        })?;

        let outcome = adapter.end_call(&session.provider_call_id, reason).await?;

        self.registry
            .force_close(call_id, BridgeCloseReason::Cancelled)
            .await;

        Ok(outcome)
    }

    /// Create the shared bridge event channel and the task draining it.
    ///
    /// Bridges receive the sender at construction; transcripts and
    /// qualification results are persisted here, and a qualification that
    /// disqualifies the lead triggers the hangup the engine cannot perform
    /// itself.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
    ) -> (mpsc::Sender<BridgeEvent>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<BridgeEvent>(BRIDGE_EVENT_CAPACITY);
        let orchestrator = self.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    BridgeEvent::Transcript {
                        call_id,
                        role,
                        text,
                        is_final,
                    } => {
                        if is_final {
                            orchestrator.store.append_transcript(
                                &call_id,
                                TranscriptLine {
                                    role,
                                    text,
                                    timestamp: Utc::now(),
                                },
                            );
                        }
                    }

                    BridgeEvent::Qualification {
                        call_id,
                        qualification,
                    } => {
                        let disqualified = qualification.status.eq_ignore_ascii_case("disqualified");
                        let stored = orchestrator.store.set_qualification(&call_id, qualification);
                        if !stored {
                            debug!(%call_id, "Duplicate qualification ignored");
                            continue;
                        }
                        if disqualified
                            && let Err(e) = orchestrator
                                .end_call(&call_id, EndReason::Disqualified)
                                .await
                        {
                            warn!(%call_id, error = %e, "Hangup after disqualification failed");
                        }
                    }

                    BridgeEvent::Closed {
                        call_id,
                        reason,
                        duration_secs,
                        stats,
                    } => {
                        info!(
                            %call_id,
                            %reason,
                            duration_secs,
                            provider_frames = stats.provider_frames,
                            agent_frames = stats.agent_frames,
                            "Bridge session closed"
                        );
                        orchestrator.registry.remove(&call_id);
                    }
                }
            }
        });

        (tx, handle)
    }
}

/// Disposition implied by an unsuccessful terminal status. Successful
/// completions carry the engine's qualification disposition instead.
fn default_disposition(status: CallStatus) -> Option<&'static str> {
    match status {
        CallStatus::NoAnswer => Some("no_answer"),
        CallStatus::Busy => Some("busy"),
        CallStatus::Voicemail => Some("voicemail"),
        CallStatus::Failed => Some("failed"),
        CallStatus::Cancelled => Some("cancelled"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dispositions() {
        assert_eq!(default_disposition(CallStatus::NoAnswer), Some("no_answer"));
        assert_eq!(default_disposition(CallStatus::Voicemail), Some("voicemail"));
        assert_eq!(default_disposition(CallStatus::Completed), None);
        assert_eq!(default_disposition(CallStatus::InProgress), None);
    }
}
