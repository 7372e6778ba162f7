//! Validation for the public base URLs handed to telephony vendors.
//!
//! Vendors call these URLs back from the public internet, so a localhost or
//! plaintext base is a misconfiguration we can catch at startup instead of
//! debugging as silent webhook loss.

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    Invalid(String),

    #[error("URL scheme must be {expected}, got {actual}")]
    WrongScheme { expected: String, actual: String },

    #[error("URL host {0} is not publicly reachable")]
    NotPublic(String),
}

/// Validate a base URL vendors will POST webhooks to. Requires `https` and
/// a publicly routable host.
pub fn validate_public_http_url(raw: &str) -> Result<(), UrlValidationError> {
    let url = parse(raw)?;
    expect_scheme(&url, &["https"])?;
    expect_public_host(&url)
}

/// Validate a base URL vendors will open media WebSockets to. Requires `wss`.
pub fn validate_public_ws_url(raw: &str) -> Result<(), UrlValidationError> {
    let url = parse(raw)?;
    expect_scheme(&url, &["wss"])?;
    expect_public_host(&url)
}

fn parse(raw: &str) -> Result<Url, UrlValidationError> {
    Url::parse(raw).map_err(|e| UrlValidationError::Invalid(format!("{raw}: {e}")))
}

fn expect_scheme(url: &Url, expected: &[&str]) -> Result<(), UrlValidationError> {
    if expected.contains(&url.scheme()) {
        Ok(())
    } else {
        Err(UrlValidationError::WrongScheme {
            expected: expected.join("/"),
            actual: url.scheme().to_string(),
        })
    }
}

fn expect_public_host(url: &Url) -> Result<(), UrlValidationError> {
    let Some(host) = url.host_str() else {
        return Err(UrlValidationError::Invalid(url.to_string()));
    };
    let lowered = host.to_ascii_lowercase();
    let private = lowered == "localhost"
        || lowered.ends_with(".local")
        || lowered.ends_with(".internal")
        || is_private_ip(&lowered);
    if private {
        Err(UrlValidationError::NotPublic(host.to_string()))
    } else {
        Ok(())
    }
}

fn is_private_ip(host: &str) -> bool {
    match host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(ip)) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(std::net::IpAddr::V6(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}
