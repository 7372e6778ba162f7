//! E.164 phone number validation.
//!
//! Lead phone numbers reach us from external ingestion and operator input;
//! vendors reject anything that is not E.164, so malformed numbers are
//! caught at enqueue time rather than burning a dial attempt.

use once_cell::sync::Lazy;
use regex::Regex;

/// `+` followed by 8 to 15 digits, first digit non-zero.
static E164: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[1-9]\d{7,14}$").expect("E.164 regex is valid"));

/// Validate one phone number, returning it normalized (whitespace, dots,
/// dashes and parentheses stripped).
pub fn validate_phone_number(raw: &str) -> Result<String, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    if E164.is_match(&cleaned) {
        Ok(cleaned)
    } else {
        Err(format!("'{raw}' is not a valid E.164 phone number"))
    }
}
