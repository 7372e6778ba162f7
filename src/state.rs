//! Shared application state.
//!
//! Everything with cross-request lifetime is built here, once, from the
//! validated configuration: the provider set, the session and queue stores,
//! the scheduler, the orchestrator, and the bridge registry. Handlers reach
//! all of it through an injected `Arc<AppState>`; there are no process-level
//! globals.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::core::bridge::{BridgeEvent, BridgeRegistry, CallContext};
use crate::core::orchestrator::Orchestrator;
use crate::core::scheduler::{
    FixedDelay, HealthMonitor, HealthMonitorConfig, OutcomeRules, QueueStore, Scheduler,
    SchedulerConfig,
};
use crate::core::sessions::SessionStore;
use crate::core::telephony::{ProviderSet, TelephonyProvider};
use crate::middleware::ConnectionTracker;

pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<SessionStore>,
    pub queue: Arc<QueueStore>,
    pub providers: Arc<ProviderSet>,
    pub scheduler: Arc<Scheduler>,
    pub orchestrator: Arc<Orchestrator>,
    /// Sender every bridge publishes transcripts/qualifications/closure to
    pub bridge_events: mpsc::Sender<BridgeEvent>,
    /// WebSocket connection counters for the limit middleware
    pub connections: Arc<ConnectionTracker>,
}

impl AppState {
    /// Build the full object graph from configuration. Fails fast on
    /// unusable provider credentials; spawns only the bridge event loop —
    /// the scheduler and health probes start in [`AppState::spawn_background`].
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let providers = Arc::new(ProviderSet::new(config.provider_configs())?);
        let store = Arc::new(SessionStore::new());
        let queue = Arc::new(QueueStore::new());
        let registry = Arc::new(BridgeRegistry::new());

        let scheduler_config = SchedulerConfig {
            pass_interval: config.pass_interval,
            max_attempts: config.max_attempts,
            calling_hours: config.calling_hours,
            dial_provider: config.dial_provider,
            from_numbers: config.from_numbers(),
            media_stream_base: config.public_media_base.clone(),
            status_callback_base: config.public_webhook_base.clone(),
            ring_timeout_secs: config.ring_timeout_secs,
            outcome_rules: OutcomeRules::default(),
        };
        let scheduler = Arc::new(Scheduler::new(
            scheduler_config,
            queue.clone(),
            store.clone(),
            providers.clone(),
            Box::new(FixedDelay(config.retry_delay)),
        ));

        let orchestrator = Orchestrator::new(
            store.clone(),
            scheduler.clone(),
            registry,
            providers.clone(),
        );
        let (bridge_events, _event_loop) = orchestrator.spawn_event_loop();

        Ok(Arc::new(Self {
            connections: Arc::new(ConnectionTracker::new(
                config.max_websocket_connections,
                config.max_connections_per_ip,
            )),
            config,
            store,
            queue,
            providers,
            scheduler,
            orchestrator,
            bridge_events,
        }))
    }

    /// Start the dialing loop and the per-provider health probes.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.scheduler.clone().run()];
        handles.extend(
            HealthMonitor::new(
                HealthMonitorConfig {
                    interval: self.config.health_interval,
                    probe_timeout: self.config.health_probe_timeout,
                    failure_threshold: self.config.health_failure_threshold,
                },
                self.providers.clone(),
                self.scheduler.clone(),
                self.store.clone(),
            )
            .spawn(),
        );
        handles
    }

    pub fn registry(&self) -> &Arc<BridgeRegistry> {
        self.orchestrator.registry()
    }

    /// Everything a bridge needs to open the agent leg for one call.
    pub fn call_context(&self, call_id: Uuid, lead_id: &str) -> CallContext {
        CallContext {
            call_id,
            lead: self.store.lead(lead_id),
            agent: self.config.agent_config(),
            greeting: self.config.greeting.clone(),
            questions: self.config.questions.clone(),
            disqualifiers: self.config.disqualifiers.clone(),
        }
    }

    /// Look up a vendor by the path segment of a media/webhook route.
    pub fn provider_from_path(&self, raw: &str) -> Option<TelephonyProvider> {
        raw.parse::<TelephonyProvider>()
            .ok()
            .filter(|provider| self.providers.get(*provider).is_some())
    }
}
