//! Scheduler behavior driven end to end through a fake vendor adapter:
//! phone rotation and the attempt limit, calling-hours gating, claim
//! single-flight, outage gating, and the initiation-failure split.

mod fixtures;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveTime, Utc};
use parking_lot::Mutex;

use dialgate::core::bridge::BridgeRegistry;
use dialgate::core::orchestrator::Orchestrator;
use dialgate::core::scheduler::{
    CallQueueEntry, CallingHours, FixedDelay, HealthMonitor, HealthMonitorConfig, OutcomeRules,
    PauseReason, QueueStatus, QueueStore, Scheduler, SchedulerConfig,
};
use dialgate::core::sessions::SessionStore;
use dialgate::core::telephony::{
    AmdConfig, BaseTelephony, CallEvent, CallEventType, CallStatus, EndOutcome, EndReason,
    ErrorDetails, HealthCheckOutcome, InitiateOptions, InitiateOutcome, ProviderSet, RawWebhook,
    Recording, RecordingRef, StatusSnapshot, TelephonyError, TelephonyProvider, TelephonyResult,
};

use fixtures::lead;

/// In-memory vendor adapter for scheduler tests.
struct FakeTelephony {
    dialed: Mutex<Vec<String>>,
    counter: AtomicU32,
    healthy: AtomicBool,
    fail_initiate: Mutex<Option<TelephonyError>>,
}

impl FakeTelephony {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            dialed: Mutex::new(Vec::new()),
            counter: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            fail_initiate: Mutex::new(None),
        })
    }

    fn dialed(&self) -> Vec<String> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl BaseTelephony for FakeTelephony {
    fn provider(&self) -> TelephonyProvider {
        TelephonyProvider::Twilio
    }

    async fn initiate_call(
        &self,
        to: &str,
        _from: &str,
        _options: &InitiateOptions,
    ) -> TelephonyResult<InitiateOutcome> {
        if let Some(error) = self.fail_initiate.lock().take() {
            return Err(error);
        }
        self.dialed.lock().push(to.to_string());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(InitiateOutcome {
            provider_call_id: format!("fake-{n}"),
            status: CallStatus::Queued,
        })
    }

    async fn end_call(
        &self,
        _provider_call_id: &str,
        _reason: EndReason,
    ) -> TelephonyResult<EndOutcome> {
        Ok(EndOutcome {
            status: CallStatus::Completed,
        })
    }

    async fn get_call_status(&self, _provider_call_id: &str) -> TelephonyResult<StatusSnapshot> {
        Ok(StatusSnapshot {
            status: CallStatus::InProgress,
            duration_secs: None,
            amd_result: None,
        })
    }

    async fn get_recording(&self, _reference: RecordingRef) -> TelephonyResult<Recording> {
        Err(TelephonyError::not_found("fake adapter has no recordings"))
    }

    fn configure_amd(&self, _config: AmdConfig) {}

    async fn health_check(&self) -> HealthCheckOutcome {
        HealthCheckOutcome {
            healthy: self.healthy.load(Ordering::SeqCst),
            response_time_ms: 1,
            error: None,
        }
    }

    fn map_event(&self, _raw: &RawWebhook) -> CallEvent {
        unimplemented!("scheduler tests synthesize events directly")
    }
}

struct Harness {
    adapter: Arc<FakeTelephony>,
    store: Arc<SessionStore>,
    queue: Arc<QueueStore>,
    scheduler: Arc<Scheduler>,
    orchestrator: Arc<Orchestrator>,
}

fn harness(max_attempts: u32) -> Harness {
    let adapter = FakeTelephony::new();
    let providers = Arc::new(ProviderSet::from_adapters(vec![adapter.clone() as Arc<dyn BaseTelephony>]));
    let store = Arc::new(SessionStore::new());
    let queue = Arc::new(QueueStore::new());

    let config = SchedulerConfig {
        pass_interval: Duration::from_secs(3600),
        max_attempts,
        // Always-open window so tests pass at any wall-clock time.
        calling_hours: CallingHours {
            start: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        },
        dial_provider: TelephonyProvider::Twilio,
        from_numbers: HashMap::from([(TelephonyProvider::Twilio, "+15550009999".to_string())]),
        media_stream_base: None,
        status_callback_base: None,
        ring_timeout_secs: 30,
        outcome_rules: OutcomeRules::default(),
    };
    let scheduler = Arc::new(Scheduler::new(
        config,
        queue.clone(),
        store.clone(),
        providers.clone(),
        Box::new(FixedDelay(Duration::ZERO)),
    ));
    let orchestrator = Orchestrator::new(
        store.clone(),
        scheduler.clone(),
        Arc::new(BridgeRegistry::new()),
        providers,
    );

    Harness {
        adapter,
        store,
        queue,
        scheduler,
        orchestrator,
    }
}

fn no_answer_event(provider_call_id: &str) -> CallEvent {
    CallEvent {
        event_id: format!("{provider_call_id}-terminal"),
        provider: TelephonyProvider::Twilio,
        provider_call_id: provider_call_id.to_string(),
        event_type: CallEventType::Status,
        status: CallStatus::NoAnswer,
        timestamp: Utc::now(),
        hangup_reason: None,
        amd_result: None,
        amd_confidence: None,
        recording: None,
        duration_secs: None,
    }
}

fn open_entries(queue: &QueueStore) -> Vec<CallQueueEntry> {
    queue
        .list()
        .into_iter()
        .filter(|e| matches!(e.status, QueueStatus::Pending | QueueStatus::Claimed))
        .collect()
}

#[tokio::test]
async fn phone_rotation_stops_at_attempt_limit() {
    let h = harness(3);
    let numbers = ["+15550000001", "+15550000002", "+15550000003"];
    h.store.upsert_lead(lead("lead-r", &numbers, "UTC"));
    h.queue
        .enqueue(CallQueueEntry::new("lead-r", 1, Utc::now(), "UTC", 0))
        .unwrap();

    for attempt in 1..=3u32 {
        h.scheduler.run_pass().await;
        assert_eq!(
            h.adapter.dialed().len(),
            attempt as usize,
            "attempt {attempt} should have dialed"
        );
        h.orchestrator
            .handle_event(no_answer_event(&format!("fake-{attempt}")))
            .await;
    }

    // phoneIndex sequence 0, 1, 2 — and no 4th entry after the 3rd attempt.
    assert_eq!(h.adapter.dialed(), numbers);
    assert!(open_entries(&h.queue).is_empty(), "queue must be exhausted");

    h.scheduler.run_pass().await;
    assert_eq!(h.adapter.dialed().len(), 3, "no 4th dial");
}

#[tokio::test]
async fn entry_outside_calling_hours_stays_pending_untouched() {
    let queue = QueueStore::new();
    // 2025-08-06T00:00:00Z is 20:00 on Aug 5 in America/New_York (EDT).
    let now = "2025-08-06T00:00:00Z".parse().unwrap();
    let scheduled = "2025-08-05T23:00:00Z".parse().unwrap();
    let id = queue
        .enqueue(CallQueueEntry::new(
            "lead-h",
            1,
            scheduled,
            "America/New_York",
            0,
        ))
        .unwrap();

    let hours = CallingHours {
        start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
    };
    assert!(queue.claim_due(now, &hours).is_empty());

    let entry = queue.get(&id).unwrap();
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.scheduled_time, scheduled);

    // Same instant is 17:00 in Los Angeles; a west-coast lead is claimable.
    let west = queue
        .enqueue(CallQueueEntry::new(
            "lead-w",
            1,
            scheduled,
            "America/Los_Angeles",
            0,
        ))
        .unwrap();
    let claimed = queue.claim_due(now, &hours);
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, west);
}

#[test]
fn concurrent_passes_claim_an_entry_exactly_once() {
    let queue = Arc::new(QueueStore::new());
    queue
        .enqueue(CallQueueEntry::new("lead-c", 1, Utc::now(), "UTC", 0))
        .unwrap();
    let hours = CallingHours {
        start: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
    };

    let now = Utc::now();
    let claimed_total: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let hours = &hours;
                scope.spawn(move || queue.claim_due(now, hours).len())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(claimed_total, 1, "exactly one pass may claim the entry");
}

#[tokio::test(flavor = "multi_thread")]
async fn probe_failures_pause_and_recovery_resumes() {
    let h = harness(3);
    h.adapter.healthy.store(false, Ordering::SeqCst);

    let monitor = HealthMonitor::new(
        HealthMonitorConfig {
            interval: Duration::from_millis(20),
            probe_timeout: Duration::from_millis(200),
            failure_threshold: 3,
        },
        Arc::new(ProviderSet::from_adapters(vec![h.adapter.clone() as Arc<dyn BaseTelephony>])),
        h.scheduler.clone(),
        h.store.clone(),
    );
    let handles = monitor.spawn();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.scheduler.is_paused());
    assert_eq!(h.scheduler.pause_reason(), Some(PauseReason::ProviderOutage));

    h.adapter.healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!h.scheduler.is_paused());

    // The gating history records both the pause and the resume.
    let events = h.store.health_events();
    let actions: Vec<_> = events.iter().filter_map(|e| e.action.clone()).collect();
    assert!(actions.contains(&"paused".to_string()));
    assert!(actions.contains(&"resumed".to_string()));

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_pause_survives_probe_recovery() {
    let h = harness(3);
    h.scheduler.pause_manual();
    h.adapter.healthy.store(false, Ordering::SeqCst);

    let monitor = HealthMonitor::new(
        HealthMonitorConfig {
            interval: Duration::from_millis(20),
            probe_timeout: Duration::from_millis(200),
            failure_threshold: 2,
        },
        Arc::new(ProviderSet::from_adapters(vec![h.adapter.clone() as Arc<dyn BaseTelephony>])),
        h.scheduler.clone(),
        h.store.clone(),
    );
    let handles = monitor.spawn();

    // Outage happens, then the provider recovers.
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.adapter.healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Automatic recovery must not lift the operator's pause.
    assert!(h.scheduler.is_paused());
    assert_eq!(h.scheduler.pause_reason(), Some(PauseReason::Manual));

    h.scheduler.resume_manual();
    assert!(!h.scheduler.is_paused());

    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn paused_scheduler_claims_nothing() {
    let h = harness(3);
    h.store.upsert_lead(lead("lead-p", &["+15550000001"], "UTC"));
    h.queue
        .enqueue(CallQueueEntry::new("lead-p", 1, Utc::now(), "UTC", 0))
        .unwrap();

    h.scheduler.pause_manual();
    h.scheduler.run_pass().await;
    assert!(h.adapter.dialed().is_empty());
    assert_eq!(open_entries(&h.queue).len(), 1);

    h.scheduler.resume_manual();
    h.scheduler.run_pass().await;
    assert_eq!(h.adapter.dialed().len(), 1);
}

#[tokio::test]
async fn retryable_initiation_failure_schedules_the_next_attempt() {
    let h = harness(3);
    h.store
        .upsert_lead(lead("lead-f", &["+15550000001", "+15550000002"], "UTC"));
    h.queue
        .enqueue(CallQueueEntry::new("lead-f", 1, Utc::now(), "UTC", 0))
        .unwrap();

    *h.adapter.fail_initiate.lock() = Some(TelephonyError::ServiceUnavailable(
        ErrorDetails::new("vendor down"),
    ));
    h.scheduler.run_pass().await;

    let open = open_entries(&h.queue);
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].attempt_number, 2);
    assert_eq!(open[0].phone_index, 1);
    assert_eq!(h.store.session_count(), 0, "no session for a failed initiation");
}

#[tokio::test]
async fn non_retryable_initiation_failure_consumes_no_retry() {
    let h = harness(3);
    h.store.upsert_lead(lead("lead-n", &["+15550000001"], "UTC"));
    h.queue
        .enqueue(CallQueueEntry::new("lead-n", 1, Utc::now(), "UTC", 0))
        .unwrap();

    *h.adapter.fail_initiate.lock() = Some(TelephonyError::Authentication(ErrorDetails::new(
        "bad credentials",
    )));
    h.scheduler.run_pass().await;

    // Surfaced to operators, not silently retried.
    assert!(open_entries(&h.queue).is_empty());
    assert!(h.adapter.dialed().is_empty());
}
