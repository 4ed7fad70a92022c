//! Conflict detection across merged provider events.
//!
//! Detection is a pure function of the event set: events are put in a
//! canonical order first, overlapping pairs are classified, and pairs that
//! share events are collapsed into one cluster record with a union-find pass.
//! Permuting the input never changes the output.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{EventRef, UnifiedCalendarEvent};

pub const CLUSTER_SUGGESTION: &str = "Several events overlap here. Review your schedule.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    TimeOverlap,
    LocationConflict,
    CrossCalendar,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::TimeOverlap => write!(f, "time overlap"),
            ConflictKind::LocationConflict => write!(f, "location conflict"),
            ConflictKind::CrossCalendar => write!(f, "cross-calendar"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConflict {
    /// Derived from the involved events, stable across detection passes
    pub id: String,
    /// Always two or more distinct events, in canonical event order
    pub event_ids: Vec<EventRef>,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub suggestion: String,
    pub resolved: bool,
}

impl CalendarConflict {
    pub fn involves(&self, event: &EventRef) -> bool {
        self.event_ids.contains(event)
    }

    pub fn is_cluster(&self) -> bool {
        self.event_ids.len() > 2
    }
}

/// Half-open overlap test. Symmetric in its arguments.
pub fn overlaps(a: &UnifiedCalendarEvent, b: &UnifiedCalendarEvent) -> bool {
    a.overlaps(b)
}

/// Total order used before any comparison: start, title, then tie-breakers.
pub fn canonical_order(a: &UnifiedCalendarEvent, b: &UnifiedCalendarEvent) -> Ordering {
    a.start_utc()
        .cmp(&b.start_utc())
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.end_utc().cmp(&b.end_utc()))
        .then_with(|| a.provider.cmp(&b.provider))
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.effective_location().cmp(&b.effective_location()))
        .then_with(|| a.is_all_day().cmp(&b.is_all_day()))
}

/// Detect and merge conflicts. Callers must only pass events with `start < end`.
pub fn detect(events: &[UnifiedCalendarEvent]) -> Vec<CalendarConflict> {
    let mut sorted: Vec<&UnifiedCalendarEvent> = events.iter().collect();
    sorted.sort_by(|a, b| canonical_order(a, b));

    let pairs = pairwise(&sorted);
    if pairs.is_empty() {
        return Vec::new();
    }

    let mut sets = DisjointSet::new(sorted.len());
    for pair in &pairs {
        sets.union(pair.a, pair.b);
    }

    // Keyed by component root; BTreeMap keeps grouping deterministic
    let mut components: BTreeMap<usize, Vec<&PairConflict>> = BTreeMap::new();
    for pair in &pairs {
        components.entry(sets.find(pair.a)).or_default().push(pair);
    }

    let mut merged: Vec<(usize, CalendarConflict)> = components
        .into_values()
        .map(|members| collapse(&sorted, &members))
        .collect();

    merged.sort_by_key(|(first_index, _)| *first_index);
    merged.into_iter().map(|(_, conflict)| conflict).collect()
}

/// One overlapping pair, indices into the canonically sorted events.
#[derive(Debug)]
struct PairConflict {
    a: usize,
    b: usize,
    kind: ConflictKind,
    severity: Severity,
    suggestion: String,
}

fn pairwise(sorted: &[&UnifiedCalendarEvent]) -> Vec<PairConflict> {
    let mut pairs = Vec::new();

    for i in 0..sorted.len() {
        for j in (i + 1)..sorted.len() {
            // Sorted by start: nothing later can overlap `i` once one starts after it ends
            if sorted[j].start_utc() >= sorted[i].end_utc() {
                break;
            }
            if overlaps(sorted[i], sorted[j]) {
                let (kind, severity, suggestion) = classify(sorted[i], sorted[j]);
                pairs.push(PairConflict {
                    a: i,
                    b: j,
                    kind,
                    severity,
                    suggestion,
                });
            }
        }
    }

    pairs
}

fn distinct_locations(a: &UnifiedCalendarEvent, b: &UnifiedCalendarEvent) -> bool {
    match (a.effective_location(), b.effective_location()) {
        (Some(la), Some(lb)) => !la.eq_ignore_ascii_case(lb),
        _ => false,
    }
}

fn classify(
    a: &UnifiedCalendarEvent,
    b: &UnifiedCalendarEvent,
) -> (ConflictKind, Severity, String) {
    let two_places = distinct_locations(a, b);

    let kind = if a.provider != b.provider {
        ConflictKind::CrossCalendar
    } else if two_places {
        ConflictKind::LocationConflict
    } else {
        ConflictKind::TimeOverlap
    };

    let severity = if two_places {
        Severity::High
    } else if a.is_all_day() || b.is_all_day() {
        Severity::Low
    } else {
        Severity::Medium
    };

    let suggestion = match kind {
        ConflictKind::CrossCalendar => format!(
            "'{}' ({}) overlaps '{}' ({}). Move one of them or decline the other.",
            a.title, a.provider, b.title, b.provider
        ),
        ConflictKind::LocationConflict => format!(
            "'{}' at {} and '{}' at {} happen at the same time in different places.",
            a.title,
            a.effective_location().unwrap_or_default(),
            b.title,
            b.effective_location().unwrap_or_default()
        ),
        ConflictKind::TimeOverlap => {
            let overlap_end = a.end_utc().min(b.end_utc());
            let overlap_start = a.start_utc().max(b.start_utc());
            format!(
                "'{}' and '{}' overlap by {} minutes.",
                a.title,
                b.title,
                (overlap_end - overlap_start).num_minutes()
            )
        }
    };

    (kind, severity, suggestion)
}

/// Turn one connected component into a conflict record.
/// Returns the smallest event index alongside it for output ordering.
fn collapse(
    sorted: &[&UnifiedCalendarEvent],
    members: &[&PairConflict],
) -> (usize, CalendarConflict) {
    let mut indices: Vec<usize> = members.iter().flat_map(|p| [p.a, p.b]).collect();
    indices.sort_unstable();
    indices.dedup();

    let first_index = indices.first().copied().unwrap_or_default();
    let event_ids: Vec<EventRef> = indices.iter().map(|&i| sorted[i].event_ref()).collect();
    let id = conflict_id(&event_ids);

    let conflict = match members {
        [single] => CalendarConflict {
            id,
            event_ids,
            kind: single.kind,
            severity: single.severity,
            suggestion: single.suggestion.clone(),
            resolved: false,
        },
        _ => CalendarConflict {
            id,
            event_ids,
            kind: ConflictKind::TimeOverlap,
            severity: Severity::High,
            suggestion: CLUSTER_SUGGESTION.to_string(),
            resolved: false,
        },
    };

    (first_index, conflict)
}

fn conflict_id(events: &[EventRef]) -> String {
    let key = events
        .iter()
        .map(EventRef::to_string)
        .collect::<Vec<_>>()
        .join("|");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Union-find over event indices with path halving and union by rank.
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        DisjointSet {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => self.parent[ra] = rb,
            Ordering::Greater => self.parent[rb] = ra,
            Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] = self.rank[ra].saturating_add(1);
            }
        }
    }
}
