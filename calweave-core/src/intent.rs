//! Captured intents: the structured record handed over by the capture step.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::date_range::parse_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainTag {
    Work,
    Personal,
    Health,
    Other,
}

impl DomainTag {
    pub const ALL: [DomainTag; 4] = [
        DomainTag::Work,
        DomainTag::Personal,
        DomainTag::Health,
        DomainTag::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainTag::Work => "work",
            DomainTag::Personal => "personal",
            DomainTag::Health => "health",
            DomainTag::Other => "other",
        }
    }
}

impl fmt::Display for DomainTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainTag::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("Unknown domain '{}'. Expected work, personal, health or other", s)
            })
    }
}

/// Approximate "when" extracted from the captured text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateHint {
    /// Some time on this day or later
    Day(chrono::NaiveDate),
    /// Not before this instant
    NotBefore(DateTime<Utc>),
    /// Exactly this start time, if it is free
    At(DateTime<Utc>),
}

impl DateHint {
    /// Parse "YYYY-MM-DD", an RFC 3339 timestamp (exact time), or
    /// "after <RFC 3339>".
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("after ") {
            return parse_instant(rest).map(DateHint::NotBefore);
        }
        if let Ok(dt) = parse_instant(s) {
            return Ok(DateHint::At(dt));
        }
        parse_date(s).map(DateHint::Day)
    }

    pub fn earliest(&self) -> DateTime<Utc> {
        match self {
            DateHint::Day(d) => d.and_time(NaiveTime::MIN).and_utc(),
            DateHint::NotBefore(dt) | DateHint::At(dt) => *dt,
        }
    }

    pub fn exact(&self) -> Option<DateTime<Utc>> {
        match self {
            DateHint::At(dt) => Some(*dt),
            _ => None,
        }
    }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("Invalid timestamp '{}'. Expected RFC 3339", s.trim()))
}

/// Structured summary of a captured thought destined to become an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedIntent {
    pub text: String,
    pub date_hint: Option<DateHint>,
    /// Free-form duration such as "1h", "45min" or "90"
    pub duration_hint: Option<String>,
    pub domain: DomainTag,
}

impl CapturedIntent {
    pub fn new(text: impl Into<String>, domain: DomainTag) -> Self {
        CapturedIntent {
            text: text.into(),
            date_hint: None,
            duration_hint: None,
            domain,
        }
    }

    pub fn with_duration(mut self, hint: impl Into<String>) -> Self {
        self.duration_hint = Some(hint.into());
        self
    }

    pub fn with_date(mut self, hint: DateHint) -> Self {
        self.date_hint = Some(hint);
        self
    }

    /// Event title: the captured text on a single trimmed line.
    pub fn title(&self) -> String {
        self.text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Duration from the hint, or `fallback_minutes` when absent or unreadable.
    pub fn duration(&self, fallback_minutes: u32) -> Duration {
        let fallback = Duration::minutes(i64::from(fallback_minutes));
        match self.duration_hint.as_deref() {
            Some(hint) => match parse_duration_hint(hint) {
                Some(d) => d,
                None => {
                    tracing::debug!(hint, "unreadable duration hint, using default");
                    fallback
                }
            },
            None => fallback,
        }
    }
}

/// Longest duration a hint may ask for.
pub const MAX_DURATION_HINT_DAYS: i64 = 7;

/// Bare integers are minutes; anything else goes through humantime.
/// Zero, sub-minute and longer-than-a-week results are rejected.
pub fn parse_duration_hint(hint: &str) -> Option<Duration> {
    let hint = hint.trim();
    let duration = match hint.parse::<u32>() {
        Ok(minutes) => Duration::minutes(i64::from(minutes)),
        Err(_) => Duration::from_std(humantime::parse_duration(hint).ok()?).ok()?,
    };
    (Duration::minutes(1)..=Duration::days(MAX_DURATION_HINT_DAYS))
        .contains(&duration)
        .then_some(duration)
}
