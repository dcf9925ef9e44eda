//! Dose frequency: the spacing between consecutive dose slots.
//!
//! Prescriptions arrive with free-text frequencies ("twice daily", "q8h",
//! "every other day"). They are parsed once at the store boundary into a
//! fixed interval; the schedule calculator only ever sees minutes.

use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MINUTES_PER_HOUR: u32 = 60;
pub const MINUTES_PER_DAY: u32 = 1440;
pub const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY;

/// "every 8 hours", "every 8h", "q8h", "q 8 hrs"
static EVERY_HOURS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:every|q)\s*(\d+)\s*(?:h|hr|hrs|hour|hours)$").unwrap()
});

/// "every 3 days", "every 2d"
static EVERY_DAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^every\s*(\d+)\s*(?:d|day|days)$").unwrap());

/// "3x daily", "3 times a day", "two times per day", "5x/day"
static TIMES_DAILY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d+|one|two|three|four|five|six)\s*(?:x|times)\s*(?:/\s*|a\s+|per\s+)?(?:daily|day)$",
    )
    .unwrap()
});

/// Fixed spacing between dose slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DoseFrequency {
    interval_minutes: u32,
}

impl DoseFrequency {
    pub const ONCE_DAILY: Self = Self {
        interval_minutes: MINUTES_PER_DAY,
    };

    /// Interval of `minutes`, never shorter than one minute.
    pub fn every_minutes(minutes: u32) -> Self {
        Self {
            interval_minutes: minutes.max(1),
        }
    }

    pub fn every_hours(hours: u32) -> Self {
        Self::every_minutes(hours.saturating_mul(MINUTES_PER_HOUR))
    }

    pub fn every_days(days: u32) -> Self {
        Self::every_minutes(days.saturating_mul(MINUTES_PER_DAY))
    }

    /// Evenly spread `times` doses across a day ("twice daily" → 12h).
    pub fn times_daily(times: u32) -> Self {
        Self::every_minutes(MINUTES_PER_DAY / times.max(1))
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes.max(1)
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes()))
    }

    /// Parse a free-text frequency. Returns `None` for text with no fixed
    /// spacing ("as needed") or text that is not recognised.
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return None;
        }

        let fixed = match normalized.as_str() {
            "once daily" | "once a day" | "daily" | "every day" | "qd" | "od" | "1x daily" => {
                Some(Self::ONCE_DAILY)
            }
            "twice daily" | "twice a day" | "bid" | "b.i.d" | "every 12 hours" => {
                Some(Self::times_daily(2))
            }
            "three times daily" | "three times a day" | "tid" | "t.i.d" => {
                Some(Self::times_daily(3))
            }
            "four times daily" | "four times a day" | "qid" | "q.i.d" => {
                Some(Self::times_daily(4))
            }
            "hourly" | "every hour" => Some(Self::every_minutes(MINUTES_PER_HOUR)),
            "every other day" | "qod" | "alternate days" => Some(Self::every_days(2)),
            "weekly" | "once weekly" | "once a week" | "every week" => {
                Some(Self::every_minutes(MINUTES_PER_WEEK))
            }
            _ => None,
        };
        if fixed.is_some() {
            return fixed;
        }

        if let Some(caps) = EVERY_HOURS.captures(&normalized) {
            let hours: u32 = caps[1].parse().ok()?;
            return (hours > 0).then(|| Self::every_hours(hours));
        }
        if let Some(caps) = EVERY_DAYS.captures(&normalized) {
            let days: u32 = caps[1].parse().ok()?;
            return (days > 0).then(|| Self::every_days(days));
        }
        if let Some(caps) = TIMES_DAILY.captures(&normalized) {
            let times = word_to_number(&caps[1])?;
            return (times > 0).then(|| Self::times_daily(times));
        }

        None
    }

    /// Parse, falling back to once daily for unrecognised text.
    pub fn parse_or_default(text: &str) -> Self {
        Self::parse(text).unwrap_or_else(|| {
            tracing::warn!(frequency = %text, "Unrecognised dose frequency, assuming once daily");
            Self::ONCE_DAILY
        })
    }
}

impl Default for DoseFrequency {
    fn default() -> Self {
        Self::ONCE_DAILY
    }
}

/// Lowercase, collapse whitespace, drop trailing periods.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_end_matches('.')
        .to_string()
}

fn word_to_number(word: &str) -> Option<u32> {
    match word {
        "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        "six" => Some(6),
        digits => digits.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(text: &str) -> Option<u32> {
        DoseFrequency::parse(text).map(|f| f.interval_minutes())
    }

    #[test]
    fn common_daily_phrases() {
        assert_eq!(minutes("Once daily"), Some(1440));
        assert_eq!(minutes("daily"), Some(1440));
        assert_eq!(minutes("Twice Daily"), Some(720));
        assert_eq!(minutes("twice  a   day"), Some(720));
        assert_eq!(minutes("three times daily"), Some(480));
        assert_eq!(minutes("four times a day"), Some(360));
    }

    #[test]
    fn latin_abbreviations() {
        assert_eq!(minutes("BID"), Some(720));
        assert_eq!(minutes("t.i.d."), Some(480));
        assert_eq!(minutes("QID"), Some(360));
        assert_eq!(minutes("qod"), Some(2880));
    }

    #[test]
    fn every_n_hours_variants() {
        assert_eq!(minutes("every 12 hours"), Some(720));
        assert_eq!(minutes("every 8h"), Some(480));
        assert_eq!(minutes("q6h"), Some(360));
        assert_eq!(minutes("q 4 hrs"), Some(240));
        assert_eq!(minutes("every 0 hours"), None);
    }

    #[test]
    fn every_n_days_and_weekly() {
        assert_eq!(minutes("every 3 days"), Some(3 * 1440));
        assert_eq!(minutes("every other day"), Some(2880));
        assert_eq!(minutes("Weekly"), Some(10080));
    }

    #[test]
    fn n_times_daily_with_numbers_and_words() {
        assert_eq!(minutes("3x daily"), Some(480));
        assert_eq!(minutes("2 times per day"), Some(720));
        assert_eq!(minutes("two times a day"), Some(720));
        assert_eq!(minutes("6x/day"), Some(240));
        assert_eq!(minutes("0x daily"), None);
    }

    #[test]
    fn as_needed_and_garbage_are_unrecognised() {
        assert_eq!(minutes("as needed"), None);
        assert_eq!(minutes("PRN"), None);
        assert_eq!(minutes(""), None);
        assert_eq!(minutes("whenever"), None);
    }

    #[test]
    fn parse_or_default_falls_back_to_daily() {
        assert_eq!(DoseFrequency::parse_or_default("as needed"), DoseFrequency::ONCE_DAILY);
        assert_eq!(DoseFrequency::parse_or_default("bid").interval_minutes(), 720);
    }

    #[test]
    fn interval_is_never_zero() {
        assert_eq!(DoseFrequency::every_minutes(0).interval_minutes(), 1);
        assert_eq!(DoseFrequency::times_daily(5000).interval_minutes(), 1);
        assert_eq!(DoseFrequency::times_daily(2).interval(), Duration::hours(12));
    }
}
