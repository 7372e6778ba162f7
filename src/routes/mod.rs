//! Route configuration, one module per surface.

pub mod api;
pub mod media;
pub mod monitor;
pub mod webhooks;
