//! Subscriptions, priorities and cancellation tokens.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use super::event::{BusEvent, BusEventKind};
use super::BusInner;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Subscriber callback. Errors are logged by the bus and never reach other subscribers.
pub type Handler = Arc<dyn Fn(&BusEvent) -> Result<(), HandlerError> + Send + Sync>;

/// Delivery tier. Urgent runs inline in `publish`; the others each get their own FIFO lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Lane index for queued tiers; `None` for urgent.
    pub(super) fn lane(&self) -> Option<usize> {
        match self {
            Priority::Urgent => None,
            Priority::High => Some(0),
            Priority::Normal => Some(1),
            Priority::Low => Some(2),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Urgent => write!(f, "urgent"),
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

pub(super) struct Subscriber {
    pub id: SubscriberId,
    pub kind: BusEventKind,
    pub priority: Priority,
    pub handler: Handler,
    active: AtomicBool,
}

impl Subscriber {
    pub fn new(id: SubscriberId, kind: BusEventKind, priority: Priority, handler: Handler) -> Self {
        Subscriber {
            id,
            kind,
            priority,
            handler,
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Cancels its subscription. Safe to call from inside that subscription's own
/// handler, in which case the handler is not invoked again.
///
/// From anywhere else, deliveries still queued when `cancel` returns are
/// dropped, but a lane delivery that has already started on another worker
/// thread runs to completion.
#[derive(Clone)]
pub struct SubscriptionToken {
    subscriber: Arc<Subscriber>,
    bus: Weak<BusInner>,
}

impl SubscriptionToken {
    pub(super) fn new(subscriber: Arc<Subscriber>, bus: Weak<BusInner>) -> Self {
        SubscriptionToken { subscriber, bus }
    }

    pub fn id(&self) -> SubscriberId {
        self.subscriber.id
    }

    pub fn is_cancelled(&self) -> bool {
        !self.subscriber.is_active()
    }

    pub fn cancel(&self) {
        // Flag first: queued deliveries check it before invoking the handler
        self.subscriber.deactivate();
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.subscriber.id);
        }
    }
}

impl fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionToken")
            .field("id", &self.subscriber.id)
            .field("kind", &self.subscriber.kind)
            .field("priority", &self.subscriber.priority)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
