//! Vendor media-stream WebSocket route configuration
//!
//! Telephony vendors connect here for every answered call and stream the
//! call audio both ways.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::media_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media-stream router
///
/// # Endpoint
///
/// `GET /media/{provider}` - WebSocket upgrade for a vendor media stream
///
/// # Protocol
///
/// After upgrade the vendor sends JSON text frames:
/// 1. `start` identifying the call and announcing the audio format
/// 2. `media` frames with base64 mu-law payloads per track
/// 3. `stop` when the call ends
///
/// We reply with `media` frames carrying agent audio and `clear` when
/// buffered audio must be dropped.
pub fn create_media_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media/{provider}", get(media_handler))
        .layer(TraceLayer::new_for_http())
}
