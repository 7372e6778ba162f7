//! Telephony error taxonomy.
//!
//! Every vendor failure — HTTP status, vendor error code, transport error —
//! is classified into one of these variants before it leaves the adapter
//! layer. Callers branch on the variant (or on [`TelephonyError::retryable`]),
//! never on vendor-specific strings.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Payload common to every taxonomy member.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetails {
    /// Vendor-specific error code, when one was provided
    pub code: Option<String>,
    /// Human-readable description
    pub message: String,
    /// Extra context preserved from the vendor response
    /// (e.g. rate-limit `limit` / `remaining` headers)
    pub metadata: HashMap<String, String>,
    /// String form of the underlying error, when one exists
    pub original: Option<String>,
}

impl ErrorDetails {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_original(mut self, original: impl fmt::Display) -> Self {
        self.original = Some(original.to_string());
        self
    }
}

/// Errors surfaced by telephony adapters.
#[derive(Debug, Error)]
pub enum TelephonyError {
    #[error("Authentication failed: {}", .0.message)]
    Authentication(ErrorDetails),

    #[error("Rate limit exceeded: {}", .0.message)]
    RateLimit(ErrorDetails),

    #[error("Call failed: {}", .0.message)]
    CallFailed(ErrorDetails),

    #[error("Network error: {}", .0.message)]
    Network(ErrorDetails),

    #[error("Validation error: {}", .0.message)]
    Validation(ErrorDetails),

    #[error("Configuration error: {}", .0.message)]
    Configuration(ErrorDetails),

    #[error("Resource not found: {}", .0.message)]
    ResourceNotFound(ErrorDetails),

    #[error("Permission denied: {}", .0.message)]
    PermissionDenied(ErrorDetails),

    #[error("Service unavailable: {}", .0.message)]
    ServiceUnavailable(ErrorDetails),

    #[error("Operation timed out: {}", .0.message)]
    Timeout(ErrorDetails),
}

impl TelephonyError {
    /// Whether the scheduler may retry the attempt that hit this error.
    ///
    /// Transient conditions are retryable; anything pointing at our own
    /// credentials, request shape, or configuration is not — those are
    /// surfaced to operators instead of silently consuming attempts.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            TelephonyError::RateLimit(_)
                | TelephonyError::Network(_)
                | TelephonyError::Timeout(_)
                | TelephonyError::ServiceUnavailable(_)
        )
    }

    /// The taxonomy member this error belongs to, without its payload.
    pub fn kind(&self) -> TaxonomyKind {
        match self {
            TelephonyError::Authentication(_) => TaxonomyKind::Authentication,
            TelephonyError::RateLimit(_) => TaxonomyKind::RateLimit,
            TelephonyError::CallFailed(_) => TaxonomyKind::CallFailed,
            TelephonyError::Network(_) => TaxonomyKind::Network,
            TelephonyError::Validation(_) => TaxonomyKind::Validation,
            TelephonyError::Configuration(_) => TaxonomyKind::Configuration,
            TelephonyError::ResourceNotFound(_) => TaxonomyKind::ResourceNotFound,
            TelephonyError::PermissionDenied(_) => TaxonomyKind::PermissionDenied,
            TelephonyError::ServiceUnavailable(_) => TaxonomyKind::ServiceUnavailable,
            TelephonyError::Timeout(_) => TaxonomyKind::Timeout,
        }
    }

    /// Access the shared detail payload.
    pub fn details(&self) -> &ErrorDetails {
        match self {
            TelephonyError::Authentication(d)
            | TelephonyError::RateLimit(d)
            | TelephonyError::CallFailed(d)
            | TelephonyError::Network(d)
            | TelephonyError::Validation(d)
            | TelephonyError::Configuration(d)
            | TelephonyError::ResourceNotFound(d)
            | TelephonyError::PermissionDenied(d)
            | TelephonyError::ServiceUnavailable(d)
            | TelephonyError::Timeout(d) => d,
        }
    }

    /// Classify an HTTP response status into the taxonomy.
    ///
    /// Unmapped statuses land in `CallFailed`, the generic member — never an
    /// untyped error.
    pub fn from_http_status(status: u16, details: ErrorDetails) -> Self {
        match status {
            401 => TelephonyError::Authentication(details),
            403 => TelephonyError::PermissionDenied(details),
            404 => TelephonyError::ResourceNotFound(details),
            408 => TelephonyError::Timeout(details),
            400 | 422 => TelephonyError::Validation(details),
            429 => TelephonyError::RateLimit(details),
            500..=599 => TelephonyError::ServiceUnavailable(details),
            _ => TelephonyError::CallFailed(details),
        }
    }

    /// Classify a transport-level error from the HTTP client.
    pub fn from_transport(err: reqwest::Error) -> Self {
        let details = ErrorDetails::new(err.to_string()).with_original(&err);
        if err.is_timeout() {
            TelephonyError::Timeout(details)
        } else {
            TelephonyError::Network(details)
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        TelephonyError::Configuration(ErrorDetails::new(message))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        TelephonyError::Validation(ErrorDetails::new(message))
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        TelephonyError::Timeout(ErrorDetails::new(message))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        TelephonyError::ResourceNotFound(ErrorDetails::new(message))
    }
}

/// Taxonomy member without its payload. Vendor error-code tables map codes
/// to these; [`TaxonomyKind::build`] attaches the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxonomyKind {
    Authentication,
    RateLimit,
    CallFailed,
    Network,
    Validation,
    Configuration,
    ResourceNotFound,
    PermissionDenied,
    ServiceUnavailable,
    Timeout,
}

impl TaxonomyKind {
    pub fn build(self, details: ErrorDetails) -> TelephonyError {
        match self {
            TaxonomyKind::Authentication => TelephonyError::Authentication(details),
            TaxonomyKind::RateLimit => TelephonyError::RateLimit(details),
            TaxonomyKind::CallFailed => TelephonyError::CallFailed(details),
            TaxonomyKind::Network => TelephonyError::Network(details),
            TaxonomyKind::Validation => TelephonyError::Validation(details),
            TaxonomyKind::Configuration => TelephonyError::Configuration(details),
            TaxonomyKind::ResourceNotFound => TelephonyError::ResourceNotFound(details),
            TaxonomyKind::PermissionDenied => TelephonyError::PermissionDenied(details),
            TaxonomyKind::ServiceUnavailable => TelephonyError::ServiceUnavailable(details),
            TaxonomyKind::Timeout => TelephonyError::Timeout(details),
        }
    }
}

/// Result type for telephony operations.
pub type TelephonyResult<T> = Result<T, TelephonyError>;
