//! Lead variable substitution for greetings and question scripts.
//!
//! Templates use `{{variable}}` placeholders. Missing lead values fall back
//! to neutral wording so a script never reads like a mail merge gone wrong.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::sessions::LeadProfile;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("placeholder regex is valid"));

/// Substitute lead-derived variables into a template.
///
/// Supported placeholders: `{{first_name}}`, `{{last_name}}`,
/// `{{property_address}}`. Unknown placeholders are left untouched.
pub fn substitute_lead_vars(template: &str, lead: Option<&LeadProfile>) -> String {
    let result = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let var = &caps[1];
        let value = lead.and_then(|l| match var {
            "first_name" => l.first_name.clone(),
            "last_name" => l.last_name.clone(),
            "property_address" => l.property_address.clone(),
            _ => None,
        });
        match value {
            Some(v) if !v.trim().is_empty() => v,
            _ => default_for(var, &caps[0]),
        }
    });

    // Collapse doubled spaces left by empty substitutions.
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn default_for(var: &str, original: &str) -> String {
    match var {
        "first_name" => "there".to_string(),
        "last_name" => String::new(),
        "property_address" => "the property".to_string(),
        _ => original.to_string(),
    }
}
