//! Human-readable lease durations.
//!
//! Operators enter durations as free text ("24 hours", "7 days"). The
//! parsing rule is fixed: numeric magnitude times a unit multiplier, with a
//! bare number meaning seconds, and 86400 seconds as the fallback for
//! anything unparseable. [`LeaseTime`] is the single owner of that rule;
//! both the lease lifecycle and configuration synthesis consume its integer
//! seconds rather than re-deriving them from text.

use std::fmt;

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Fallback when duration text cannot be parsed.
const DEFAULT_SECONDS: u32 = 86_400;

/// A lease duration parsed from operator-entered text.
///
/// Keeps the original text for display and persistence alongside the
/// resolved second count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseTime {
    text: String,
    seconds: u32,
}

impl LeaseTime {
    /// Parses duration text. Never fails: unparseable input resolves to
    /// 86400 seconds.
    pub fn parse(text: &str) -> Self {
        Self {
            text: text.to_string(),
            seconds: parse_seconds(text).unwrap_or(DEFAULT_SECONDS),
        }
    }

    /// A duration of exactly `seconds` seconds.
    pub fn from_seconds(seconds: u32) -> Self {
        Self {
            text: format!("{seconds} seconds"),
            seconds,
        }
    }

    /// The resolved duration in seconds.
    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    /// The resolved duration as a chrono delta.
    pub fn delta(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.seconds))
    }
}

impl Default for LeaseTime {
    fn default() -> Self {
        Self::parse("24 hours")
    }
}

impl fmt::Display for LeaseTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for LeaseTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for LeaseTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::parse(&text))
    }
}

fn parse_seconds(text: &str) -> Option<u32> {
    let mut parts = text.split_whitespace();
    let magnitude: u32 = parts.next()?.parse().ok()?;

    let multiplier = match parts.next() {
        None => 1,
        Some(unit) => match unit.to_lowercase().trim_end_matches('s') {
            "second" | "sec" => 1,
            "minute" | "min" => 60,
            "hour" => 3_600,
            "day" => 86_400,
            "week" => 604_800,
            _ => return None,
        },
    };

    if parts.next().is_some() {
        return None;
    }

    magnitude.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(LeaseTime::parse("24 hours").seconds(), 86_400);
        assert_eq!(LeaseTime::parse("7 days").seconds(), 604_800);
        assert_eq!(LeaseTime::parse("1 week").seconds(), 604_800);
        assert_eq!(LeaseTime::parse("90 minutes").seconds(), 5_400);
        assert_eq!(LeaseTime::parse("30 seconds").seconds(), 30);
        assert_eq!(LeaseTime::parse("2 Hours").seconds(), 7_200);
    }

    #[test]
    fn test_parse_bare_number_is_seconds() {
        assert_eq!(LeaseTime::parse("3600").seconds(), 3_600);
    }

    #[test]
    fn test_unparseable_falls_back_to_default() {
        assert_eq!(LeaseTime::parse("").seconds(), 86_400);
        assert_eq!(LeaseTime::parse("forever").seconds(), 86_400);
        assert_eq!(LeaseTime::parse("24 fortnights").seconds(), 86_400);
        assert_eq!(LeaseTime::parse("1 2 3").seconds(), 86_400);
        assert_eq!(LeaseTime::parse("-5 hours").seconds(), 86_400);
    }

    #[test]
    fn test_text_round_trip() {
        let time = LeaseTime::parse("12 hours");
        assert_eq!(time.to_string(), "12 hours");

        let json = serde_json::to_string(&time).unwrap();
        assert_eq!(json, "\"12 hours\"");
        let back: LeaseTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, time);
    }
}
