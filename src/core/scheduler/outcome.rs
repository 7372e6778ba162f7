//! Terminal outcome classification.
//!
//! Once a call session reaches a terminal status, the scheduler maps
//! `(status, disposition, amd result, hangup reason)` to a class that
//! drives the retry decision. The rule table is data, not code: operators
//! can reorder or extend it through configuration.

use serde::{Deserialize, Serialize};

use crate::core::telephony::{AmdResult, CallStatus};

/// What a finished attempt means for the lead's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    /// A qualifying outcome was reached; stop dialing this lead
    TerminalSuccess,
    /// Worth another attempt (subject to the attempt limit)
    Retryable,
    /// Stop dialing without a success
    TerminalFailure,
}

/// The inputs classification runs on.
#[derive(Debug, Clone, Default)]
pub struct OutcomeFacts<'a> {
    pub status: Option<CallStatus>,
    pub disposition: Option<&'a str>,
    pub amd_result: Option<AmdResult>,
    pub hangup_reason: Option<&'a str>,
}

/// One rule: all present fields must match for the rule to fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRule {
    #[serde(default)]
    pub status: Option<CallStatus>,
    /// Exact disposition match; "*" matches any present disposition
    #[serde(default)]
    pub disposition: Option<String>,
    #[serde(default)]
    pub amd_result: Option<AmdResult>,
    /// Substring match on the vendor hangup reason
    #[serde(default)]
    pub hangup_contains: Option<String>,
    pub class: OutcomeClass,
}

impl OutcomeRule {
    fn matches(&self, facts: &OutcomeFacts<'_>) -> bool {
        if let Some(status) = self.status
            && facts.status != Some(status)
        {
            return false;
        }
        if let Some(disposition) = &self.disposition {
            match facts.disposition {
                Some(actual) => {
                    if disposition != "*" && !actual.eq_ignore_ascii_case(disposition) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if let Some(amd) = self.amd_result
            && facts.amd_result != Some(amd)
        {
            return false;
        }
        if let Some(fragment) = &self.hangup_contains {
            match facts.hangup_reason {
                Some(reason) => {
                    if !reason.to_ascii_lowercase().contains(&fragment.to_ascii_lowercase()) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// Ordered rule table; first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRules {
    pub rules: Vec<OutcomeRule>,
    /// Applied when no rule matches
    pub fallback: OutcomeClass,
}

impl Default for OutcomeRules {
    /// Default table: explicit disqualification and any completed call with
    /// a final disposition are successes; could-not-reach outcomes are
    /// retryable; everything else is a terminal failure.
    fn default() -> Self {
        let rule = |status: Option<CallStatus>,
                    disposition: Option<&str>,
                    amd_result: Option<AmdResult>,
                    class: OutcomeClass| OutcomeRule {
            status,
            disposition: disposition.map(str::to_string),
            amd_result,
            hangup_contains: None,
            class,
        };

        Self {
            rules: vec![
                rule(None, Some("disqualified"), None, OutcomeClass::TerminalSuccess),
                rule(
                    Some(CallStatus::Completed),
                    Some("*"),
                    None,
                    OutcomeClass::TerminalSuccess,
                ),
                rule(Some(CallStatus::NoAnswer), None, None, OutcomeClass::Retryable),
                rule(Some(CallStatus::Busy), None, None, OutcomeClass::Retryable),
                rule(Some(CallStatus::Cancelled), None, None, OutcomeClass::Retryable),
                rule(Some(CallStatus::Failed), None, None, OutcomeClass::Retryable),
                rule(Some(CallStatus::Voicemail), None, None, OutcomeClass::Retryable),
                rule(None, None, Some(AmdResult::Machine), OutcomeClass::Retryable),
                rule(None, None, Some(AmdResult::Fax), OutcomeClass::TerminalFailure),
                rule(
                    Some(CallStatus::Completed),
                    None,
                    None,
                    OutcomeClass::TerminalSuccess,
                ),
            ],
            fallback: OutcomeClass::TerminalFailure,
        }
    }
}

impl OutcomeRules {
    pub fn classify(&self, facts: &OutcomeFacts<'_>) -> OutcomeClass {
        self.rules
            .iter()
            .find(|rule| rule.matches(facts))
            .map(|rule| rule.class)
            .unwrap_or(self.fallback)
    }
}
