//! HTTP and WebSocket request handlers
//!
//! This module organizes all handlers into logical groups:
//! - `api` - Operator API: calls, queue, provider health
//! - `webhooks` - Vendor status webhook ingestion
//! - `media` - Vendor media-stream WebSocket (one per live call)
//! - `monitor` - Live listen-in WebSocket taps

pub mod api;
pub mod media;
pub mod monitor;
pub mod webhooks;

// Re-export commonly used handlers for convenient access
pub use media::media_handler;
pub use monitor::monitor_handler;
