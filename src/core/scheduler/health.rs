//! Provider health probing and outage gating.
//!
//! Each configured provider gets a periodic, timeout-bounded probe. N
//! consecutive failures pause dequeuing with the provider-outage reason;
//! the next success resumes it. Probe results are data fed to the tracker,
//! never exceptions — a timed-out probe counts as a failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::Scheduler;
use crate::core::sessions::{HealthEventRecord, SessionStore};
use crate::core::telephony::{HealthCheckOutcome, ProviderSet};

/// What a probe result requires the scheduler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatingAction {
    /// Failure threshold crossed: suspend dequeuing
    Pause,
    /// First success after an outage: resume dequeuing
    Resume,
}

/// Consecutive-failure tracker for one provider.
#[derive(Debug)]
pub struct OutageTracker {
    threshold: u32,
    consecutive_failures: u32,
    in_outage: bool,
}

impl OutageTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            in_outage: false,
        }
    }

    /// Feed one probe result; returns the action it triggers, if any.
    pub fn record(&mut self, healthy: bool) -> Option<GatingAction> {
        if healthy {
            self.consecutive_failures = 0;
            if self.in_outage {
                self.in_outage = false;
                return Some(GatingAction::Resume);
            }
            None
        } else {
            self.consecutive_failures += 1;
            if !self.in_outage && self.consecutive_failures >= self.threshold {
                self.in_outage = true;
                return Some(GatingAction::Pause);
            }
            None
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn in_outage(&self) -> bool {
        self.in_outage
    }
}

/// Probe settings.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub failure_threshold: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Spawns one probe loop per configured provider.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    providers: Arc<ProviderSet>,
    scheduler: Arc<Scheduler>,
    store: Arc<SessionStore>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        providers: Arc<ProviderSet>,
        scheduler: Arc<Scheduler>,
        store: Arc<SessionStore>,
    ) -> Self {
        Self {
            config,
            providers,
            scheduler,
            store,
        }
    }

    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for (kind, adapter) in self.providers.iter() {
            let adapter = adapter.clone();
            let scheduler = self.scheduler.clone();
            let store = self.store.clone();
            let config = self.config.clone();

            handles.push(tokio::spawn(async move {
                let mut tracker = OutageTracker::new(config.failure_threshold);
                let mut ticker = tokio::time::interval(config.interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    ticker.tick().await;

                    let outcome =
                        match tokio::time::timeout(config.probe_timeout, adapter.health_check())
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => HealthCheckOutcome {
                                healthy: false,
                                response_time_ms: config.probe_timeout.as_millis() as u64,
                                error: Some("probe timed out".to_string()),
                            },
                        };

                    let action = tracker.record(outcome.healthy);
                    match action {
                        Some(GatingAction::Pause) => {
                            warn!(
                                provider = %kind,
                                failures = tracker.consecutive_failures(),
                                "Health probes failing, pausing dialing"
                            );
                            scheduler.pause_outage(kind);
                        }
                        Some(GatingAction::Resume) => {
                            info!(
                                provider = %kind,
                                response_time_ms = outcome.response_time_ms,
                                "Provider recovered, resuming dialing"
                            );
                            scheduler.resume_outage();
                        }
                        None => {}
                    }

                    store.record_health_event(HealthEventRecord {
                        provider: kind,
                        healthy: outcome.healthy,
                        response_time_ms: outcome.response_time_ms,
                        error: outcome.error,
                        consecutive_failures: tracker.consecutive_failures(),
                        action: action.map(|a| {
                            match a {
                                GatingAction::Pause => "paused",
                                GatingAction::Resume => "resumed",
                            }
                            .to_string()
                        }),
                        at: Utc::now(),
                    });
                }
            }));
        }
        handles
    }
}
