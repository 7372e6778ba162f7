//! Bearer-token authentication for the operator API and monitor sockets.
//!
//! Tokens are compared against the configured API secrets in constant time.
//! Webhook and vendor media endpoints do not pass through this middleware;
//! their authenticity story is signature verification at the handler.

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::config::AuthApiSecret;
use crate::state::AppState;

/// Authenticated principal, inserted into request extensions on success.
/// `id` is `None` when authentication is disabled.
#[derive(Clone, Debug)]
pub struct Auth {
    pub id: Option<String>,
}

impl Auth {
    pub fn empty() -> Self {
        Self { id: None }
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization")]
    Missing,

    #[error("Malformed authorization header")]
    Malformed,

    #[error("Invalid API secret")]
    Unauthorized,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}

/// Find the id of the API secret matching `token`, comparing every
/// configured secret in constant time regardless of early matches.
pub fn match_api_secret_id<'a>(token: &str, secrets: &'a [AuthApiSecret]) -> Option<&'a str> {
    let mut matched: Option<&str> = None;
    for entry in secrets {
        if entry.secret.as_bytes().ct_eq(token.as_bytes()).into() {
            matched = matched.or(Some(entry.id.as_str()));
        }
    }
    matched
}

/// Extract the bearer token from the Authorization header, or from a
/// `?token=` query parameter for WebSocket clients that cannot set headers.
fn extract_token(request: &Request<Body>) -> Result<String, AuthError> {
    if let Some(header) = request.headers().get("authorization") {
        let value = header.to_str().map_err(|_| AuthError::Malformed)?;
        return value
            .strip_prefix("Bearer ")
            .map(str::to_string)
            .ok_or(AuthError::Malformed);
    }

    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "token" {
                return Ok(value.to_string());
            }
        }
    }

    Err(AuthError::Missing)
}

/// Validate the request against the configured API secrets. When
/// authentication is disabled an empty [`Auth`] context is inserted so
/// handlers can still read one.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    if !state.config.auth_required {
        request.extensions_mut().insert(Auth::empty());
        return Ok(next.run(request).await);
    }

    let token = extract_token(&request)?;
    match match_api_secret_id(&token, &state.config.auth_api_secrets) {
        Some(id) => {
            tracing::debug!(auth_id = %id, path = %request.uri().path(), "Authenticated");
            request.extensions_mut().insert(Auth::new(id));
            Ok(next.run(request).await)
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "Rejected invalid API secret");
            Err(AuthError::Unauthorized)
        }
    }
}
