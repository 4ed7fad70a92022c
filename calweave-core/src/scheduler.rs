//! Buffer-aware slot finding.
//!
//! Every existing event keeps `[start, end + buffer)` unavailable. A new
//! event needs room for its own duration plus the buffer that will trail it;
//! the buffer is never placed before a start time.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::CalendarConflict;
use crate::error::SchedulingError;
use crate::event::{EventRef, TimeSlot, UnifiedCalendarEvent};
use crate::intent::DomainTag;

/// Upper bound on alternatives offered for one draft.
pub const MAX_ALTERNATIVES: usize = 3;

const ALTERNATIVE_STEP_MINUTES: i64 = 15;
const ALTERNATIVE_RADIUS_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotConfidence {
    /// Free and inside the search horizon
    Certain,
    /// Nothing fit inside the horizon; this is the first free time after it
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedSlot {
    pub slot: TimeSlot,
    pub confidence: SlotConfidence,
}

impl ProposedSlot {
    pub fn is_certain(&self) -> bool {
        self.confidence == SlotConfidence::Certain
    }
}

/// Daily time-of-day window (UTC) that events of a domain must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DailyWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        DailyWindow { start, end }
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// Earliest start at or after `cursor` that keeps `duration` inside a window.
    /// `None` past the last representable day.
    fn align(&self, cursor: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
        let date = cursor.date_naive();
        let day_start = date.and_time(self.start).and_utc();
        let day_end = date.and_time(self.end).and_utc();

        if cursor < day_start {
            Some(day_start)
        } else if cursor.checked_add_signed(duration)? <= day_end {
            Some(cursor)
        } else {
            day_start.checked_add_signed(Duration::days(1))
        }
    }
}

/// Per-domain placement rules.
#[derive(Debug, Clone, Default)]
pub struct SchedulingPolicy {
    pub windows: HashMap<DomainTag, DailyWindow>,
}

impl SchedulingPolicy {
    pub fn with_window(mut self, domain: DomainTag, window: DailyWindow) -> Self {
        self.windows.insert(domain, window);
        self
    }

    /// The domain's window, if it can hold `duration` at all.
    fn window_for(&self, domain: DomainTag, duration: Duration) -> Option<DailyWindow> {
        let window = *self.windows.get(&domain)?;
        if window.length() < duration {
            tracing::warn!(
                domain = %domain,
                minutes = duration.num_minutes(),
                "event is longer than the domain's daily window, ignoring window"
            );
            return None;
        }
        Some(window)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SmartScheduler {
    policy: SchedulingPolicy,
}

impl SmartScheduler {
    pub fn new(policy: SchedulingPolicy) -> Self {
        SmartScheduler { policy }
    }

    /// Greedy earliest fit inside `horizon`.
    ///
    /// When nothing fits before the horizon ends, the first free slot after
    /// it is returned with [`SlotConfidence::Low`]. Only fails when the search
    /// runs off the end of the representable time range.
    pub fn find_slot(
        &self,
        duration: Duration,
        domain: DomainTag,
        existing: &[UnifiedCalendarEvent],
        horizon: TimeSlot,
        buffer_minutes: u32,
    ) -> Result<ProposedSlot, SchedulingError> {
        let need = duration + Duration::minutes(i64::from(buffer_minutes));
        let window = self.policy.window_for(domain, duration);
        let busy = occupied(existing, None);

        let mut cursor = horizon.start;
        let mut confidence = SlotConfidence::Certain;

        loop {
            let candidate = match window {
                Some(w) => w.align(cursor, duration).ok_or(SchedulingError::OutOfRange)?,
                None => cursor,
            };
            let reserved_until = candidate
                .checked_add_signed(need)
                .ok_or(SchedulingError::OutOfRange)?;

            if confidence == SlotConfidence::Certain && reserved_until > horizon.end {
                confidence = SlotConfidence::Low;
                cursor = cursor.max(horizon.end);
                continue;
            }

            match blocking_until(&busy, candidate, reserved_until) {
                Some(free_at) => cursor = free_at,
                None => {
                    return Ok(ProposedSlot {
                        slot: TimeSlot::new(candidate, candidate + duration),
                        confidence,
                    });
                }
            }
        }
    }

    /// Whether `slot` plus a trailing buffer stays clear of every existing
    /// event's occupied time, buffers included.
    pub fn is_free(
        &self,
        slot: TimeSlot,
        existing: &[UnifiedCalendarEvent],
        buffer_minutes: u32,
    ) -> bool {
        let busy = occupied(existing, None);
        match slot
            .end
            .checked_add_signed(Duration::minutes(i64::from(buffer_minutes)))
        {
            Some(reserved_until) => blocking_until(&busy, slot.start, reserved_until).is_none(),
            None => false,
        }
    }

    /// Nearby free slots for a draft that collided with `conflicts`,
    /// nearest to the draft's start first. At most [`MAX_ALTERNATIVES`].
    pub fn find_alternatives(
        &self,
        draft: &UnifiedCalendarEvent,
        domain: DomainTag,
        existing: &[UnifiedCalendarEvent],
        conflicts: &[CalendarConflict],
        not_before: DateTime<Utc>,
    ) -> Vec<TimeSlot> {
        let origin = draft.start_utc();
        let duration = draft.end_utc() - origin;
        let need = duration + Duration::minutes(i64::from(draft.buffer_minutes));
        let window = self.policy.window_for(domain, duration);
        let own = draft.event_ref();
        let busy = occupied(existing, Some(&own));
        let radius = Duration::hours(ALTERNATIVE_RADIUS_HOURS);

        let mut candidates: BTreeSet<DateTime<Utc>> = BTreeSet::new();

        // Edges of whatever the draft ran into
        let blocking: HashSet<&EventRef> = conflicts
            .iter()
            .flat_map(|c| c.event_ids.iter())
            .filter(|r| **r != own)
            .collect();
        for event in existing.iter().filter(|e| blocking.contains(&e.event_ref())) {
            candidates.insert(event.occupied_until());
            candidates.extend(event.start_utc().checked_sub_signed(need));
        }

        let step = Duration::minutes(ALTERNATIVE_STEP_MINUTES);
        for k in 1..=(radius.num_minutes() / ALTERNATIVE_STEP_MINUTES) {
            let offset = step * k as i32;
            candidates.extend(origin.checked_add_signed(offset));
            candidates.extend(origin.checked_sub_signed(offset));
        }

        let mut free: Vec<DateTime<Utc>> = candidates
            .into_iter()
            .filter(|c| *c != origin && *c >= not_before)
            .filter(|c| (*c - origin).abs() <= radius)
            .filter(|c| window.is_none_or(|w| w.align(*c, duration) == Some(*c)))
            .filter(|c| {
                c.checked_add_signed(need)
                    .is_some_and(|until| blocking_until(&busy, *c, until).is_none())
            })
            .collect();

        free.sort_by_key(|c| ((*c - origin).abs(), *c));
        free.into_iter()
            .take(MAX_ALTERNATIVES)
            .map(|c| TimeSlot::new(c, c + duration))
            .collect()
    }
}

/// `[start, end + buffer)` for each event, sorted by start.
fn occupied(
    events: &[UnifiedCalendarEvent],
    skip: Option<&EventRef>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut busy: Vec<_> = events
        .iter()
        .filter(|e| skip.is_none_or(|r| e.provider != r.provider || e.id != r.id))
        .map(|e| (e.start_utc(), e.occupied_until()))
        .collect();
    busy.sort();
    busy
}

/// If `[candidate, end)` hits busy time, the latest end among the
/// intervals it hits.
fn blocking_until(
    busy: &[(DateTime<Utc>, DateTime<Utc>)],
    candidate: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    busy.iter()
        .take_while(|(start, _)| *start < end)
        .filter(|(_, until)| candidate < *until)
        .map(|(_, until)| *until)
        .max()
}
