//! Events published on the bus.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::conflict::CalendarConflict;
use crate::event::{ProviderId, TimeSlot, UnifiedCalendarEvent};
use crate::provider::ProviderKind;
use crate::scheduler::SlotConfidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusEventKind {
    ConflictsDetected,
    EventSuggested,
    EventCreated,
    ProviderAdded,
    ProviderFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// A fetch cycle produced a non-empty conflict set
    ConflictsDetected { conflicts: Vec<CalendarConflict> },

    /// A captured intent could not be placed without a decision from the user
    EventSuggested {
        draft: UnifiedCalendarEvent,
        conflicts: Vec<CalendarConflict>,
        alternatives: Vec<TimeSlot>,
        confidence: SlotConfidence,
    },

    /// Written back to the provider; `event.id` is the provider's id
    EventCreated { event: UnifiedCalendarEvent },

    ProviderAdded {
        provider: ProviderId,
        kind: ProviderKind,
    },

    /// Collected (not raised) provider failure in resilient fetch mode
    ProviderFailed { provider: ProviderId, error: String },
}

impl BusEvent {
    pub fn kind(&self) -> BusEventKind {
        match self {
            BusEvent::ConflictsDetected { .. } => BusEventKind::ConflictsDetected,
            BusEvent::EventSuggested { .. } => BusEventKind::EventSuggested,
            BusEvent::EventCreated { .. } => BusEventKind::EventCreated,
            BusEvent::ProviderAdded { .. } => BusEventKind::ProviderAdded,
            BusEvent::ProviderFailed { .. } => BusEventKind::ProviderFailed,
        }
    }

    /// Name used in logs, e.g. "conflict:detected".
    pub fn name(&self) -> &'static str {
        match self {
            BusEvent::ConflictsDetected { .. } => "conflict:detected",
            BusEvent::EventSuggested { .. } => "event:suggested",
            BusEvent::EventCreated { .. } => "event:created",
            BusEvent::ProviderAdded { .. } => "provider:added",
            BusEvent::ProviderFailed { .. } => "provider:failed",
        }
    }
}

impl fmt::Display for BusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusEvent::ConflictsDetected { conflicts } => {
                write!(f, "{} ({} conflicts)", self.name(), conflicts.len())
            }
            BusEvent::EventSuggested { draft, .. } => write!(f, "{} {}", self.name(), draft),
            BusEvent::EventCreated { event } => write!(f, "{} {}", self.name(), event),
            BusEvent::ProviderAdded { provider, .. } => write!(f, "{} {}", self.name(), provider),
            BusEvent::ProviderFailed { provider, error } => {
                write!(f, "{} {}: {}", self.name(), provider, error)
            }
        }
    }
}
