//! Vendor webhook route configuration
//!
//! One endpoint per vendor, unauthenticated (authenticity is the HMAC
//! signature check inside the handler), always acknowledging 200.

use axum::{Router, routing::post};
use tower_http::trace::TraceLayer;

use crate::handlers::webhooks;
use crate::state::AppState;
use std::sync::Arc;

/// Create the webhook router
///
/// # Endpoints
///
/// - `POST /webhooks/twilio` - form-encoded status callbacks
/// - `POST /webhooks/telnyx` - JSON event envelopes
pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhooks/twilio", post(webhooks::twilio_webhook))
        .route("/webhooks/telnyx", post(webhooks::telnyx_webhook))
        .layer(TraceLayer::new_for_http())
}
