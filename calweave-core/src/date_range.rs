//! Date range for filtering events.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::UnifiedCalendarEvent;

/// Number of days fetched in each direction when no range is given.
pub const DEFAULT_RANGE_DAYS: i64 = 14;

/// Date range for filtering events.
/// None values mean unbounded in that direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Default for DateRange {
    /// Default range: ±DEFAULT_RANGE_DAYS from now
    fn default() -> Self {
        DateRange::around(Utc::now(), DEFAULT_RANGE_DAYS)
    }
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        DateRange {
            from: Some(from),
            to: Some(to),
        }
    }

    /// `days` before and after `center`.
    pub fn around(center: DateTime<Utc>, days: i64) -> Self {
        DateRange::new(center - Duration::days(days), center + Duration::days(days))
    }

    /// `days` starting at `start`.
    pub fn starting_at(start: DateTime<Utc>, days: i64) -> Self {
        DateRange::new(start, start + Duration::days(days))
    }

    /// Parse CLI-style bounds.
    /// - `from`: "start" for unbounded, or YYYY-MM-DD
    /// - `to`: YYYY-MM-DD, defaults to +DEFAULT_RANGE_DAYS if not specified
    pub fn from_args(from: Option<&str>, to: Option<&str>) -> Result<Self, String> {
        let now = Utc::now();

        let from_dt = match from {
            Some("start") => None,
            Some(s) => Some(parse_date_start(s)?),
            None => Some(now - Duration::days(DEFAULT_RANGE_DAYS)),
        };

        let to_dt = match to {
            Some(s) => Some(parse_date_end(s)?),
            None => Some(now + Duration::days(DEFAULT_RANGE_DAYS)),
        };

        if let (Some(f), Some(t)) = (from_dt, to_dt) {
            if t <= f {
                return Err(format!("Range end {} is not after its start {}", t, f));
            }
        }

        Ok(DateRange {
            from: from_dt,
            to: to_dt,
        })
    }

    /// Whether the event's interval intersects this range.
    pub fn intersects(&self, event: &UnifiedCalendarEvent) -> bool {
        let after_from = self.from.is_none_or(|from| event.end_utc() > from);
        let before_to = self.to.is_none_or(|to| event.start_utc() < to);
        after_from && before_to
    }

    /// Get `from` as RFC3339 string, using the epoch if unbounded.
    pub fn from_rfc3339(&self) -> String {
        self.from.unwrap_or(DateTime::UNIX_EPOCH).to_rfc3339()
    }

    /// Get `to` as RFC3339 string, using a far future date if unbounded.
    pub fn to_rfc3339(&self) -> String {
        self.to.unwrap_or_else(far_future).to_rfc3339()
    }
}

fn far_future() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2100, 1, 1)
        .unwrap_or(NaiveDate::MAX)
        .and_time(NaiveTime::MIN)
        .and_utc()
}

/// Parse YYYY-MM-DD as start of day in UTC
fn parse_date_start(s: &str) -> Result<DateTime<Utc>, String> {
    let date = parse_date(s)?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

/// Parse YYYY-MM-DD as the start of the following day (exclusive end)
fn parse_date_end(s: &str) -> Result<DateTime<Utc>, String> {
    let date = parse_date(s)?;
    let next = date
        .succ_opt()
        .ok_or_else(|| format!("Date '{}' is out of range", s))?;
    Ok(next.and_time(NaiveTime::MIN).and_utc())
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date format '{}'. Expected YYYY-MM-DD", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ProviderId, TimeSlot};
    use chrono::TimeZone;

    #[test]
    fn test_from_args_parses_inclusive_days() {
        let range = DateRange::from_args(Some("2025-03-01"), Some("2025-03-02")).unwrap();
        assert_eq!(range.from, Some(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(range.to, Some(Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_from_args_start_is_unbounded() {
        let range = DateRange::from_args(Some("start"), Some("2025-03-02")).unwrap();
        assert!(range.from.is_none());
        assert!(range.from_rfc3339().starts_with("1970-01-01"));
    }

    #[test]
    fn test_from_args_rejects_bad_input() {
        assert!(DateRange::from_args(Some("03/01/2025"), None).is_err());
        assert!(DateRange::from_args(Some("2025-03-05"), Some("2025-03-01")).is_err());
    }

    #[test]
    fn test_intersects_is_half_open() {
        let range = DateRange::new(
            Utc.with_ymd_and_hms(2025, 3, 20, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 20, 12, 0, 0).unwrap(),
        );
        let before = UnifiedCalendarEvent::draft(
            "Before",
            TimeSlot::new(
                Utc.with_ymd_and_hms(2025, 3, 20, 9, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 3, 20, 10, 0, 0).unwrap(),
            ),
            ProviderId::new("a"),
            "primary",
        );
        let inside = UnifiedCalendarEvent::draft(
            "Inside",
            TimeSlot::new(
                Utc.with_ymd_and_hms(2025, 3, 20, 9, 30, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 3, 20, 10, 30, 0).unwrap(),
            ),
            ProviderId::new("a"),
            "primary",
        );
        assert!(!range.intersects(&before));
        assert!(range.intersects(&inside));
    }
}
