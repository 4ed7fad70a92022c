//! Priority-tiered publish/subscribe hub.
//!
//! Urgent subscribers run synchronously inside [`EventBus::publish`]. High,
//! normal and low subscribers are fed through one FIFO lane per tier, each
//! drained by its own task, so ordering holds within a lane but not across
//! lanes. Every published event is also recorded to the optional
//! [`PatternSink`] before any subscriber sees it.

mod event;
mod subscription;

pub use event::{BusEvent, BusEventKind};
pub use subscription::{Handler, HandlerError, Priority, SubscriberId, SubscriptionToken};

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, oneshot};

use subscription::Subscriber;

const LANE_COUNT: usize = 3;
/// Attempts made to hand one event to the pattern sink.
pub const SINK_ATTEMPTS: usize = 3;

/// Receives every published event, e.g. for usage-pattern learning.
pub trait PatternSink: Send + Sync {
    fn record(&self, event: &BusEvent) -> Result<(), HandlerError>;
}

enum LaneMessage {
    Deliver {
        event: Arc<BusEvent>,
        subscriber: Arc<Subscriber>,
    },
    Flush(oneshot::Sender<()>),
}

pub(crate) struct BusInner {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    lanes: [mpsc::UnboundedSender<LaneMessage>; LANE_COUNT],
    sink: Option<Arc<dyn PatternSink>>,
    next_id: AtomicU64,
}

impl BusInner {
    pub(crate) fn remove(&self, id: SubscriberId) {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.retain(|s| s.id != id);
    }
}

/// Cheap to clone; clones share subscribers and lanes.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus without a pattern sink. Must be called inside a Tokio runtime.
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_pattern_sink(sink: Arc<dyn PatternSink>) -> Self {
        Self::build(Some(sink))
    }

    fn build(sink: Option<Arc<dyn PatternSink>>) -> Self {
        let lanes = std::array::from_fn(|lane| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_lane(lane, rx));
            tx
        });

        EventBus {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                lanes,
                sink,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe<F>(&self, kind: BusEventKind, priority: Priority, handler: F) -> SubscriptionToken
    where
        F: Fn(&BusEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber = Arc::new(Subscriber::new(id, kind, priority, Arc::new(handler)));

        let mut subs = self.inner.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.push(Arc::clone(&subscriber));

        SubscriptionToken::new(subscriber, Arc::downgrade(&self.inner))
    }

    /// Record to the sink, run urgent handlers, then enqueue the rest.
    pub fn publish(&self, event: BusEvent) {
        tracing::debug!(event = %event, "publishing");

        if let Some(sink) = &self.inner.sink {
            record_with_retry(sink.as_ref(), &event);
        }

        // Snapshot so handlers may subscribe or cancel without deadlocking
        let matching: Vec<Arc<Subscriber>> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.kind == event.kind())
            .cloned()
            .collect();

        let event = Arc::new(event);
        for subscriber in matching {
            match subscriber.priority.lane() {
                None => deliver(&subscriber, &event),
                Some(lane) => {
                    let message = LaneMessage::Deliver {
                        event: Arc::clone(&event),
                        subscriber,
                    };
                    if self.inner.lanes[lane].send(message).is_err() {
                        tracing::error!(lane, "bus lane closed, dropping delivery");
                    }
                }
            }
        }
    }

    /// Wait until everything queued so far on every lane has been delivered.
    pub async fn flush(&self) {
        let mut pending = Vec::with_capacity(LANE_COUNT);
        for lane in &self.inner.lanes {
            let (tx, rx) = oneshot::channel();
            if lane.send(LaneMessage::Flush(tx)).is_ok() {
                pending.push(rx);
            }
        }
        for rx in pending {
            let _ = rx.await;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_lane(lane: usize, mut rx: mpsc::UnboundedReceiver<LaneMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            LaneMessage::Deliver { event, subscriber } => deliver(&subscriber, &event),
            LaneMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::trace!(lane, "bus lane stopped");
}

/// Invoke one handler, isolating its errors and panics.
fn deliver(subscriber: &Subscriber, event: &BusEvent) {
    if !subscriber.is_active() {
        return;
    }

    match catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(
            subscriber = subscriber.id.0,
            priority = %subscriber.priority,
            event = event.name(),
            error = %e,
            "subscriber failed"
        ),
        Err(_) => tracing::error!(
            subscriber = subscriber.id.0,
            priority = %subscriber.priority,
            event = event.name(),
            "subscriber panicked"
        ),
    }
}

fn record_with_retry(sink: &dyn PatternSink, event: &BusEvent) {
    for attempt in 1..=SINK_ATTEMPTS {
        match catch_unwind(AssertUnwindSafe(|| sink.record(event))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => {
                tracing::warn!(attempt, event = event.name(), error = %e, "pattern sink failed")
            }
            Err(_) => tracing::warn!(attempt, event = event.name(), "pattern sink panicked"),
        }
    }
    tracing::error!(event = event.name(), "pattern sink gave up");
}
