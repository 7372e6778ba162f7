//! Connection limits for the WebSocket endpoints.
//!
//! Media sockets arrive from telephony vendors and monitor sockets from
//! operators; both are long-lived. A global cap protects the process, a
//! per-IP cap protects it from one misbehaving peer. Slots are held by a
//! guard that releases on drop, so a handler cannot leak a slot on any
//! exit path.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Counts live WebSocket connections, globally and per client IP.
pub struct ConnectionTracker {
    max_total: Option<usize>,
    max_per_ip: u32,
    total: AtomicUsize,
    per_ip: DashMap<IpAddr, usize>,
}

impl ConnectionTracker {
    pub fn new(max_total: Option<usize>, max_per_ip: u32) -> Self {
        Self {
            max_total,
            max_per_ip,
            total: AtomicUsize::new(0),
            per_ip: DashMap::new(),
        }
    }

    /// Claim a slot for `ip`. The returned guard releases it on drop.
    pub fn try_acquire(
        self: &Arc<Self>,
        ip: IpAddr,
    ) -> Result<ConnectionGuard, ConnectionLimitError> {
        if let Some(max) = self.max_total
            && self.total.load(Ordering::SeqCst) >= max
        {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        {
            let mut entry = self.per_ip.entry(ip).or_insert(0);
            if *entry >= self.max_per_ip as usize {
                return Err(ConnectionLimitError::PerIpLimitReached);
            }
            *entry += 1;
        }
        self.total.fetch_add(1, Ordering::SeqCst);

        Ok(ConnectionGuard {
            tracker: self.clone(),
            ip,
        })
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn for_ip(&self, ip: &IpAddr) -> usize {
        self.per_ip.get(ip).map(|count| *count).unwrap_or(0)
    }

    fn release(&self, ip: IpAddr) {
        self.total.fetch_sub(1, Ordering::SeqCst);
        if let Some(mut entry) = self.per_ip.get_mut(&ip) {
            *entry = entry.saturating_sub(1);
        }
        self.per_ip.remove_if(&ip, |_, count| *count == 0);
    }
}

/// Held for the lifetime of one accepted WebSocket connection.
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
    ip: IpAddr,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.release(self.ip);
    }
}

/// Shareable guard handle carried through request extensions to the
/// WebSocket handler, which keeps it alive for the socket's lifetime.
#[derive(Clone)]
pub struct ConnectionSlot(pub Arc<ConnectionGuard>);

/// Enforce connection limits on WebSocket upgrade requests. Other requests
/// pass through untouched.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !is_ws_upgrade {
        return next.run(request).await;
    }

    match state.connections.try_acquire(addr.ip()) {
        Ok(guard) => {
            request
                .extensions_mut()
                .insert(ConnectionSlot(Arc::new(guard)));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(ip = %addr.ip(), "Rejecting connection: global limit reached");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(ip = %addr.ip(), "Rejecting connection: per-IP limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        Ipv4Addr::new(192, 168, 1, last).into()
    }

    #[test]
    fn test_per_ip_limit() {
        let tracker = Arc::new(ConnectionTracker::new(Some(10), 2));
        let a = tracker.try_acquire(ip(1)).unwrap();
        let _b = tracker.try_acquire(ip(1)).unwrap();
        assert_eq!(
            tracker.try_acquire(ip(1)).err(),
            Some(ConnectionLimitError::PerIpLimitReached)
        );
        // Another IP still has room.
        assert!(tracker.try_acquire(ip(2)).is_ok());

        drop(a);
        assert!(tracker.try_acquire(ip(1)).is_ok());
    }

    #[test]
    fn test_global_limit() {
        let tracker = Arc::new(ConnectionTracker::new(Some(2), 10));
        let _a = tracker.try_acquire(ip(1)).unwrap();
        let _b = tracker.try_acquire(ip(2)).unwrap();
        assert_eq!(
            tracker.try_acquire(ip(3)).err(),
            Some(ConnectionLimitError::GlobalLimitReached)
        );
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let tracker = Arc::new(ConnectionTracker::new(None, 5));
        {
            let _guard = tracker.try_acquire(ip(9)).unwrap();
            assert_eq!(tracker.total(), 1);
            assert_eq!(tracker.for_ip(&ip(9)), 1);
        }
        assert_eq!(tracker.total(), 0);
        assert_eq!(tracker.for_ip(&ip(9)), 0);
    }
}
