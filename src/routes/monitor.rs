//! Live-monitor WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::monitor_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the monitor router
///
/// # Endpoint
///
/// `GET /monitor/{call_id}` - read-only WebSocket tap on a live call,
/// delivering `{source, payload, sample_rate}` JSON frames for both audio
/// directions. Unknown or inactive call ids are rejected with 404.
pub fn create_monitor_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/monitor/{call_id}", get(monitor_handler))
        .layer(TraceLayer::new_for_http())
}
