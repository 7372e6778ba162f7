//! Telnyx Call Control adapter: REST client and webhook normalization.

mod client;
mod config;
mod messages;

pub use client::TelnyxTelephony;
pub use config::{TELNYX_API_BASE, TelnyxConfig};
pub use messages::{TelnyxCallData, TelnyxErrorBody, map_amd_result, map_event_type, map_hangup_cause};
