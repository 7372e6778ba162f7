//! Calling-hours windows and lead timezone resolution.
//!
//! Dial eligibility is evaluated in the lead's local time. Timezones are
//! IANA names stored on the queue entry, resolved once at ingestion from a
//! region code when the lead record has no explicit timezone.

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use phf::phf_map;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// US state / region code to IANA timezone. Split states use the zone
/// covering the majority of their population.
static REGION_TIMEZONES: phf::Map<&'static str, &'static str> = phf_map! {
    "AL" => "America/Chicago",
    "AK" => "America/Anchorage",
    "AZ" => "America/Phoenix",
    "AR" => "America/Chicago",
    "CA" => "America/Los_Angeles",
    "CO" => "America/Denver",
    "CT" => "America/New_York",
    "DC" => "America/New_York",
    "DE" => "America/New_York",
    "FL" => "America/New_York",
    "GA" => "America/New_York",
    "HI" => "Pacific/Honolulu",
    "ID" => "America/Boise",
    "IL" => "America/Chicago",
    "IN" => "America/Indiana/Indianapolis",
    "IA" => "America/Chicago",
    "KS" => "America/Chicago",
    "KY" => "America/New_York",
    "LA" => "America/Chicago",
    "ME" => "America/New_York",
    "MD" => "America/New_York",
    "MA" => "America/New_York",
    "MI" => "America/Detroit",
    "MN" => "America/Chicago",
    "MS" => "America/Chicago",
    "MO" => "America/Chicago",
    "MT" => "America/Denver",
    "NE" => "America/Chicago",
    "NV" => "America/Los_Angeles",
    "NH" => "America/New_York",
    "NJ" => "America/New_York",
    "NM" => "America/Denver",
    "NY" => "America/New_York",
    "NC" => "America/New_York",
    "ND" => "America/Chicago",
    "OH" => "America/New_York",
    "OK" => "America/Chicago",
    "OR" => "America/Los_Angeles",
    "PA" => "America/New_York",
    "RI" => "America/New_York",
    "SC" => "America/New_York",
    "SD" => "America/Chicago",
    "TN" => "America/Chicago",
    "TX" => "America/Chicago",
    "UT" => "America/Denver",
    "VT" => "America/New_York",
    "VA" => "America/New_York",
    "WA" => "America/Los_Angeles",
    "WV" => "America/New_York",
    "WI" => "America/Chicago",
    "WY" => "America/Denver",
};

/// Fallback when the region is unknown.
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// Resolve a region code to an IANA timezone name.
pub fn resolve_timezone(region: &str) -> &'static str {
    REGION_TIMEZONES
        .get(region.trim().to_ascii_uppercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_TIMEZONE)
}

/// Daily window during which dialing is allowed, in lead-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for CallingHours {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
            end: NaiveTime::from_hms_opt(19, 0, 0).expect("valid time"),
        }
    }
}

impl CallingHours {
    /// Whether `now` falls inside the window in the given timezone.
    ///
    /// An unparseable timezone falls back to UTC with a warning rather than
    /// blocking the lead forever.
    pub fn permits(&self, now: DateTime<Utc>, timezone: &str) -> bool {
        let local_time = match timezone.parse::<Tz>() {
            Ok(tz) => now.with_timezone(&tz).time(),
            Err(_) => {
                warn!(timezone, "Unparseable timezone, evaluating calling hours in UTC");
                now.time()
            }
        };

        if self.start <= self.end {
            local_time >= self.start && local_time < self.end
        } else {
            // Window spans midnight.
            local_time >= self.start || local_time < self.end
        }
    }
}
