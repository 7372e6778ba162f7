use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the operator API router with protected routes
///
/// Note: Authentication middleware should be applied in main.rs after state is available
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Calls
        .route("/v1/calls", post(api::dial_now))
        .route(
            "/v1/calls/{call_id}",
            get(api::get_call).delete(api::hangup_call),
        )
        .route("/v1/calls/{call_id}/status", get(api::poll_call_status))
        .route("/v1/calls/{call_id}/recording", get(api::get_call_recording))
        // Queue
        .route("/v1/queue", post(api::enqueue_lead).get(api::list_queue))
        .route("/v1/queue/pause", post(api::pause_queue))
        .route("/v1/queue/resume", post(api::resume_queue))
        .route("/v1/queue/status", get(api::queue_status))
        .route("/v1/queue/{entry_id}", delete(api::skip_queue_entry))
        // Providers
        .route("/v1/providers/health", get(api::providers_health))
        .route("/v1/providers/amd", put(api::set_amd_config))
        .layer(TraceLayer::new_for_http())
}
