//! The dialing scheduler: queue, retry policy, and pause gating.
//!
//! A single non-overlapping periodic loop claims due queue entries and
//! places one call per claim through the selected provider adapter. The
//! loop never waits for a call to answer or finish — terminal outcomes come
//! back through the orchestrator as normalized events and feed
//! [`Scheduler::handle_outcome`], which decides whether a lead gets another
//! entry.

pub mod health;
pub mod hours;
pub mod outcome;
pub mod queue;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::sessions::{CallSession, SessionStore};
use crate::core::telephony::{InitiateOptions, ProviderSet, TelephonyProvider};

pub use health::{GatingAction, HealthMonitor, HealthMonitorConfig, OutageTracker};
pub use hours::{CallingHours, DEFAULT_TIMEZONE, resolve_timezone};
pub use outcome::{OutcomeClass, OutcomeFacts, OutcomeRule, OutcomeRules};
pub use queue::{CallQueueEntry, QueueError, QueueStatus, QueueStore};

// =============================================================================
// Retry Delay Policy
// =============================================================================

/// Pluggable policy for spacing retry attempts.
pub trait RetryDelayPolicy: Send + Sync {
    /// Delay before the attempt following `completed_attempt`.
    fn next_delay(&self, completed_attempt: u32) -> Duration;
}

/// Default policy: a fixed delay between attempts.
pub struct FixedDelay(pub Duration);

impl RetryDelayPolicy for FixedDelay {
    fn next_delay(&self, _completed_attempt: u32) -> Duration {
        self.0
    }
}

// =============================================================================
// Pause State
// =============================================================================

/// Why dequeuing is suspended. Manual and automatic pauses are tracked
/// independently so neither mechanism can silently override the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Manual,
    ProviderOutage,
}

#[derive(Debug, Default)]
struct PauseFlags {
    manual: bool,
    outage: bool,
}

// =============================================================================
// Configuration
// =============================================================================

/// Scheduler settings, read from server configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between scheduler passes
    pub pass_interval: Duration,
    /// Maximum dial attempts per lead
    pub max_attempts: u32,
    /// Daily dialing window, evaluated in each lead's timezone
    pub calling_hours: CallingHours,
    /// The vendor calls are placed through
    pub dial_provider: TelephonyProvider,
    /// Caller id per vendor
    pub from_numbers: HashMap<TelephonyProvider, String>,
    /// Public base for vendor media streams, e.g. `wss://host/media`
    pub media_stream_base: Option<String>,
    /// Public base for vendor webhooks, e.g. `https://host/webhooks`
    pub status_callback_base: Option<String>,
    /// Ring timeout passed to the vendor
    pub ring_timeout_secs: u64,
    /// Terminal outcome classification table
    pub outcome_rules: OutcomeRules,
}

// =============================================================================
// Scheduler
// =============================================================================

pub struct Scheduler {
    config: SchedulerConfig,
    queue: Arc<QueueStore>,
    store: Arc<SessionStore>,
    providers: Arc<ProviderSet>,
    delay_policy: Box<dyn RetryDelayPolicy>,
    pause: Mutex<PauseFlags>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        queue: Arc<QueueStore>,
        store: Arc<SessionStore>,
        providers: Arc<ProviderSet>,
        delay_policy: Box<dyn RetryDelayPolicy>,
    ) -> Self {
        Self {
            config,
            queue,
            store,
            providers,
            delay_policy,
            pause: Mutex::new(PauseFlags::default()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Enqueue the first attempt for a lead.
    pub fn enqueue_lead(
        &self,
        lead: crate::core::sessions::LeadProfile,
        delay: Option<Duration>,
    ) -> Result<uuid::Uuid, QueueError> {
        let timezone = lead.timezone.clone();
        let lead_id = lead.id.clone();
        self.store.upsert_lead(lead);

        let scheduled = Utc::now()
            + chrono::Duration::from_std(delay.unwrap_or(Duration::ZERO))
                .unwrap_or_else(|_| chrono::Duration::zero());
        self.queue
            .enqueue(CallQueueEntry::new(lead_id, 1, scheduled, timezone, 0))
    }

    // -------------------------------------------------------------------------
    // Pause / resume
    // -------------------------------------------------------------------------

    pub fn pause_manual(&self) {
        self.pause.lock().manual = true;
        info!("Queue paused by operator");
    }

    pub fn resume_manual(&self) {
        self.pause.lock().manual = false;
        info!("Queue resumed by operator");
    }

    pub(crate) fn pause_outage(&self, provider: TelephonyProvider) {
        self.pause.lock().outage = true;
        warn!(%provider, "Queue paused: provider outage");
    }

    pub(crate) fn resume_outage(&self) {
        self.pause.lock().outage = false;
        info!("Queue resumed: provider recovered");
    }

    pub fn is_paused(&self) -> bool {
        let flags = self.pause.lock();
        flags.manual || flags.outage
    }

    /// The reason shown to operators. A manual pause takes display priority.
    pub fn pause_reason(&self) -> Option<PauseReason> {
        let flags = self.pause.lock();
        if flags.manual {
            Some(PauseReason::Manual)
        } else if flags.outage {
            Some(PauseReason::ProviderOutage)
        } else {
            None
        }
    }

    // -------------------------------------------------------------------------
    // The loop
    // -------------------------------------------------------------------------

    /// Run the periodic loop. A single task executes passes sequentially, so
    /// a new pass cannot start while the previous one is still claiming and
    /// dispatching.
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.pass_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_pass().await;
            }
        })
    }

    /// One scheduler pass: claim everything currently eligible, then place
    /// one call per claim. Placing a call awaits only the initiation
    /// request, never call progress.
    pub async fn run_pass(&self) {
        if self.is_paused() {
            return;
        }

        let claimed = self.queue.claim_due(Utc::now(), &self.config.calling_hours);
        if claimed.is_empty() {
            return;
        }
        info!(count = claimed.len(), "Scheduler pass claimed entries");

        for entry in claimed {
            self.dispatch(entry).await;
        }
    }

    /// Place the call for one claimed entry.
    async fn dispatch(&self, entry: CallQueueEntry) {
        let Some(lead) = self.store.lead(&entry.lead_id) else {
            warn!(lead_id = %entry.lead_id, "Claimed entry for unknown lead, completing it");
            let _ = self.queue.complete(&entry.id);
            return;
        };

        if lead.phone_numbers.is_empty() {
            warn!(lead_id = %lead.id, "Lead has no phone numbers, completing entry");
            let _ = self.queue.complete(&entry.id);
            return;
        }
        let phone_index = entry.phone_index % lead.phone_numbers.len();
        let to = lead.phone_numbers[phone_index].clone();

        let provider_kind = self.config.dial_provider;
        let Some(provider) = self.providers.get(provider_kind) else {
            error!(%provider_kind, "Dial provider not configured");
            let _ = self.queue.complete(&entry.id);
            return;
        };

        let Some(from) = self.config.from_numbers.get(&provider_kind).cloned() else {
            error!(%provider_kind, "No caller id configured for dial provider");
            let _ = self.queue.complete(&entry.id);
            return;
        };

        let options = InitiateOptions {
            stream_url: self
                .config
                .media_stream_base
                .as_ref()
                .map(|base| format!("{base}/{provider_kind}")),
            status_callback_url: self
                .config
                .status_callback_base
                .as_ref()
                .map(|base| format!("{base}/{provider_kind}")),
            amd: None,
            timeout_secs: Some(self.config.ring_timeout_secs),
        };

        match provider.initiate_call(&to, &from, &options).await {
            Ok(outcome) => {
                info!(
                    lead_id = %lead.id,
                    provider_call_id = %outcome.provider_call_id,
                    attempt = entry.attempt_number,
                    phone_index,
                    "Call initiated"
                );
                let session = CallSession::new(
                    provider_kind,
                    outcome.provider_call_id,
                    lead.id.clone(),
                    phone_index,
                    entry.attempt_number,
                    outcome.status,
                );
                self.store.insert_session(session);
                // The entry stays Claimed until the terminal outcome lands
                // in handle_outcome, keeping the lead single-flight.
            }
            Err(e) if e.retryable() => {
                warn!(lead_id = %lead.id, error = %e, "Retryable initiation failure");
                let _ = self.queue.complete(&entry.id);
                self.schedule_next(&entry, lead.phone_numbers.len());
            }
            Err(e) => {
                // Non-retryable: surfaced to operators, attempt not consumed
                // by a silent retry.
                error!(
                    lead_id = %lead.id,
                    error = %e,
                    "Non-retryable initiation failure, lead requires operator attention"
                );
                let _ = self.queue.complete(&entry.id);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Outcome handling
    // -------------------------------------------------------------------------

    /// Consume the terminal outcome of a finished session. Called exactly
    /// once per session by the orchestrator (the event store guarantees the
    /// became-terminal signal fires once).
    pub fn handle_outcome(&self, session: &CallSession) {
        let Some(entry) = self.queue.open_entry_for_lead(&session.lead_id) else {
            // Initiation path already concluded the entry (or an operator
            // skipped it); nothing to do.
            return;
        };
        let _ = self.queue.complete(&entry.id);

        let facts = OutcomeFacts {
            status: Some(session.status),
            disposition: session.disposition.as_deref(),
            amd_result: session.amd_result,
            hangup_reason: session.hangup_reason.as_deref(),
        };
        let class = self.config.outcome_rules.classify(&facts);
        info!(
            lead_id = %session.lead_id,
            status = %session.status,
            ?class,
            attempt = session.attempt_number,
            "Terminal outcome classified"
        );

        match class {
            OutcomeClass::Retryable => {
                let phone_count = self
                    .store
                    .lead(&session.lead_id)
                    .map(|l| l.phone_numbers.len())
                    .unwrap_or(1);
                let template = CallQueueEntry {
                    attempt_number: session.attempt_number,
                    phone_index: session.phone_index_used,
                    ..entry
                };
                self.schedule_next(&template, phone_count);
            }
            OutcomeClass::TerminalSuccess | OutcomeClass::TerminalFailure => {
                // Queue exhausted for this lead by decision, not by limit.
            }
        }
    }

    /// Create the follow-up entry after a retryable outcome, rotating to the
    /// lead's next phone number. No entry is created once the attempt limit
    /// is reached.
    fn schedule_next(&self, completed: &CallQueueEntry, phone_count: usize) {
        if completed.attempt_number >= self.config.max_attempts {
            info!(
                lead_id = %completed.lead_id,
                attempts = completed.attempt_number,
                "Attempt limit reached, queue exhausted for lead"
            );
            return;
        }

        let delay = self.delay_policy.next_delay(completed.attempt_number);
        let next = CallQueueEntry::new(
            completed.lead_id.clone(),
            completed.attempt_number + 1,
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            completed.timezone.clone(),
            (completed.phone_index + 1) % phone_count.max(1),
        );

        match self.queue.enqueue(next) {
            Ok(id) => info!(
                lead_id = %completed.lead_id,
                entry_id = %id,
                attempt = completed.attempt_number + 1,
                "Retry scheduled"
            ),
            Err(e) => warn!(lead_id = %completed.lead_id, error = %e, "Could not schedule retry"),
        }
    }

    /// Snapshot for the operator status endpoint.
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            paused: self.is_paused(),
            reason: self.pause_reason(),
            pending_entries: self.queue.pending_count(),
        }
    }

}

/// Operator-facing scheduler state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStatus {
    pub paused: bool,
    pub reason: Option<PauseReason>,
    pub pending_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_policy() {
        let policy = FixedDelay(Duration::from_secs(300));
        assert_eq!(policy.next_delay(1), Duration::from_secs(300));
        assert_eq!(policy.next_delay(7), Duration::from_secs(300));
    }

    #[test]
    fn test_pause_reasons_are_independent() {
        let flags = Mutex::new(PauseFlags::default());
        {
            let mut f = flags.lock();
            f.manual = true;
            f.outage = true;
        }
        // Clearing the outage leaves the manual pause standing.
        flags.lock().outage = false;
        assert!(flags.lock().manual);
    }
}
