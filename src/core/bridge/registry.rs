//! Registry of live bridge sessions.
//!
//! Owned by the orchestrator and passed by reference to the components that
//! need to find a session: the monitor endpoint, the hangup path, and the
//! media handlers themselves. Deliberately not a global — everything that
//! can look up a bridge received this registry at construction.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{AudioBridge, BridgeCloseReason, BridgeError, MonitorFrame};

/// Call-id-keyed registry of in-progress bridges.
#[derive(Default)]
pub struct BridgeRegistry {
    bridges: DashMap<Uuid, Arc<AudioBridge>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bridge: Arc<AudioBridge>) {
        self.bridges.insert(bridge.call_id(), bridge);
    }

    pub fn remove(&self, call_id: &Uuid) {
        self.bridges.remove(call_id);
    }

    pub fn get(&self, call_id: &Uuid) -> Option<Arc<AudioBridge>> {
        self.bridges.get(call_id).map(|b| b.clone())
    }

    pub fn active_count(&self) -> usize {
        self.bridges.len()
    }

    /// Attach a monitor tap to a live call. Unknown or inactive call ids get
    /// a distinct not-found signal.
    pub fn attach_monitor(
        &self,
        call_id: &Uuid,
    ) -> Result<(Uuid, mpsc::Receiver<MonitorFrame>), BridgeError> {
        let bridge = self.get(call_id).ok_or(BridgeError::NotFound(*call_id))?;
        Ok(bridge.attach_monitor())
    }

    /// Force-close both legs of a call's bridge, if one is active. Used when
    /// `end_call` is invoked so the hangup propagates to the media session.
    pub async fn force_close(&self, call_id: &Uuid, reason: BridgeCloseReason) {
        if let Some((_, bridge)) = self.bridges.remove(call_id) {
            bridge.close(reason).await;
        }
    }
}
