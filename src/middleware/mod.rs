pub mod auth;
pub mod connection_limit;

// Re-export middleware functions
pub use auth::{Auth, AuthError, auth_middleware};
pub use connection_limit::{
    ConnectionSlot, ConnectionTracker, connection_limit_middleware,
};
