//! Provider-neutral event types.
//!
//! Every provider converts its own representation into these types, and the
//! rest of calweave (conflict detection, scheduling, the manager snapshot)
//! works exclusively with them.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CalWeaveError, CalWeaveResult};

/// Identifier of a registered provider (e.g. "work", "family").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        ProviderId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        ProviderId::new(id)
    }
}

/// Names one event across every provider. Event ids alone are only unique
/// inside the provider that assigned them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventRef {
    pub provider: ProviderId,
    pub id: String,
}

impl EventRef {
    pub fn new(provider: impl Into<ProviderId>, id: impl Into<String>) -> Self {
        EventRef {
            provider: provider.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTime {
    DateTime(DateTime<Utc>),
    /// All-day. As an end value the date is exclusive.
    Date(NaiveDate),
}

impl EventTime {
    /// The instant this time refers to. Dates resolve to midnight UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(dt) => *dt,
            EventTime::Date(d) => d.and_time(chrono::NaiveTime::MIN).and_utc(),
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M")),
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// Read-only mirror of a provider event
    #[default]
    Provider,
    /// Locally built draft that has not been written back yet
    Draft,
}

/// A candidate (start, end) interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        TimeSlot { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// A calendar event (provider-neutral)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedCalendarEvent {
    /// Provider-assigned id, or a local `draft-` id before write-back
    pub id: String,
    pub title: String,
    pub start: EventTime,
    pub end: EventTime,
    pub location: Option<String>,
    pub notes: Option<String>,

    // Ownership
    pub provider: ProviderId,
    /// Sub-calendar inside the provider
    pub calendar_id: String,

    // Accommodation
    /// Padding reserved after the end. Set, never accumulated.
    #[serde(default)]
    pub buffer_minutes: u32,
    #[serde(default)]
    pub reminder_minutes: u32,
    /// Alternative times proposed when the event could not be placed as-is
    #[serde(default)]
    pub alternatives: Vec<TimeSlot>,

    #[serde(default)]
    pub origin: EventOrigin,
}

impl UnifiedCalendarEvent {
    /// Build a local draft with a fresh `draft-` id.
    pub fn draft(
        title: impl Into<String>,
        slot: TimeSlot,
        provider: ProviderId,
        calendar_id: impl Into<String>,
    ) -> Self {
        UnifiedCalendarEvent {
            id: format!("draft-{}", uuid::Uuid::new_v4()),
            title: title.into(),
            start: EventTime::DateTime(slot.start),
            end: EventTime::DateTime(slot.end),
            location: None,
            notes: None,
            provider,
            calendar_id: calendar_id.into(),
            buffer_minutes: 0,
            reminder_minutes: 0,
            alternatives: Vec::new(),
            origin: EventOrigin::Draft,
        }
    }

    pub fn event_ref(&self) -> EventRef {
        EventRef::new(self.provider.clone(), self.id.clone())
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.to_utc()
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        self.end.to_utc()
    }

    pub fn is_all_day(&self) -> bool {
        self.start.is_date() || self.end.is_date()
    }

    pub fn is_draft(&self) -> bool {
        self.origin == EventOrigin::Draft
    }

    /// Location if it carries any non-whitespace text.
    pub fn effective_location(&self) -> Option<&str> {
        self.location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }

    /// Set the buffer. Repeated calls with the same value leave the event unchanged.
    pub fn apply_buffer(&mut self, minutes: u32) {
        self.buffer_minutes = minutes;
    }

    /// End of the time this event keeps unavailable, buffer included.
    /// Saturates at the last representable instant.
    pub fn occupied_until(&self) -> DateTime<Utc> {
        self.end_utc()
            .checked_add_signed(Duration::minutes(i64::from(self.buffer_minutes)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Half-open interval overlap; touching endpoints do not overlap.
    pub fn overlaps(&self, other: &UnifiedCalendarEvent) -> bool {
        self.start_utc() < other.end_utc() && other.start_utc() < self.end_utc()
    }

    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.start_utc(), self.end_utc())
    }

    /// Reject events that would break the detector's preconditions.
    pub fn validate(&self) -> CalWeaveResult<()> {
        if self.end_utc() <= self.start_utc() {
            return Err(CalWeaveError::InvalidEvent {
                id: self.id.clone(),
                reason: format!("end ({}) is not after start ({})", self.end, self.start),
            });
        }
        Ok(())
    }

    /// Turn a draft into the committed mirror of the provider's copy.
    pub fn committed(mut self, provider_id: String) -> Self {
        self.id = provider_id;
        self.origin = EventOrigin::Provider;
        self
    }
}

impl fmt::Display for UnifiedCalendarEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} - {})", self.title, self.start, self.end)
    }
}
