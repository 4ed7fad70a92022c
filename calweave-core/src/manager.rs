//! The calendar manager: owns the providers, runs the fetch/merge cycle and
//! turns captured intents into calendar events.
//!
//! Readers get the last committed [`Snapshot`] as an `Arc` and never block
//! on a running cycle. Writers (fetch commits and the capture pipeline) are
//! serialized by one async mutex, so a snapshot is always the complete
//! output of a single cycle. Events written back after a fetch started are
//! carried into that fetch's commit, so a slow fetch cannot hide them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, EventBus};
use crate::clock::{Clock, SystemClock};
use crate::config::ManagerConfig;
use crate::conflict::{self, CalendarConflict};
use crate::date_range::DateRange;
use crate::error::{CalWeaveError, CalWeaveResult, SchedulingError};
use crate::event::{EventRef, ProviderId, TimeSlot, UnifiedCalendarEvent};
use crate::intent::CapturedIntent;
use crate::provider::{CalendarProvider, CalendarProviderRef};
use crate::routing::{DomainRouter, StaticDomainRouter};
use crate::scheduler::{ProposedSlot, SlotConfidence, SmartScheduler};
use crate::store::{EventStore, NoopStore};

/// Output of one fetch/merge cycle.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Every fetched event in canonical order
    pub events: Vec<UnifiedCalendarEvent>,
    pub conflicts: Vec<CalendarConflict>,
    /// `None` until the first fetch commits
    pub range: Option<DateRange>,
    pub generated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn event(&self, key: &EventRef) -> Option<&UnifiedCalendarEvent> {
        self.events
            .iter()
            .find(|e| e.provider == key.provider && e.id == key.id)
    }
}

/// A provider error collected instead of raised.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub error: CalWeaveError,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub snapshot: Arc<Snapshot>,
    /// Only ever non-empty when `abort_on_first_error` is off
    pub failures: Vec<ProviderFailure>,
    /// Events dropped because they failed validation
    pub rejected: Vec<CalWeaveError>,
}

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// Written back; the event carries the provider-assigned id
    Created(UnifiedCalendarEvent),
    /// Not written; the user has to pick
    Suggested {
        draft: UnifiedCalendarEvent,
        conflicts: Vec<CalendarConflict>,
        alternatives: Vec<TimeSlot>,
        confidence: SlotConfidence,
    },
}

/// An event written back by the capture pipeline, tagged with the write
/// sequence number it was committed under.
#[derive(Debug)]
struct LocalWrite {
    seq: u64,
    event: UnifiedCalendarEvent,
}

pub struct CalendarManager {
    config: ManagerConfig,
    bus: EventBus,
    scheduler: SmartScheduler,
    router: Arc<dyn DomainRouter>,
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    providers: RwLock<Vec<Arc<dyn CalendarProvider>>>,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Serializes commits; holds writes a running fetch may not have seen
    writer: Mutex<Vec<LocalWrite>>,
    write_seq: AtomicU64,
}

impl CalendarManager {
    pub fn new(config: ManagerConfig, bus: EventBus) -> Self {
        CalendarManager {
            config,
            bus,
            scheduler: SmartScheduler::default(),
            router: Arc::new(StaticDomainRouter::new()),
            store: Arc::new(NoopStore),
            clock: Arc::new(SystemClock),
            providers: RwLock::new(Vec::new()),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(Vec::new()),
            write_seq: AtomicU64::new(0),
        }
    }

    pub fn with_scheduler(mut self, scheduler: SmartScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_router(mut self, router: Arc<dyn DomainRouter>) -> Self {
        self.router = router;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register a provider. Ids must be unique.
    pub fn add_provider(&self, provider: Arc<dyn CalendarProvider>) -> CalWeaveResult<()> {
        let id = provider.id().clone();
        let kind = provider.kind();
        {
            let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
            if providers.iter().any(|p| p.id() == &id) {
                return Err(CalWeaveError::Config(format!(
                    "Provider '{}' is already registered",
                    id
                )));
            }
            providers.push(provider);
        }

        tracing::info!(provider = %id, kind = %kind, "provider added");
        self.bus.publish(BusEvent::ProviderAdded { provider: id, kind });
        Ok(())
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.registered().iter().map(|p| p.id().clone()).collect()
    }

    fn registered(&self) -> Vec<Arc<dyn CalendarProvider>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn provider(&self, id: &ProviderId) -> CalWeaveResult<Arc<dyn CalendarProvider>> {
        self.registered()
            .into_iter()
            .find(|p| p.id() == id)
            .ok_or_else(|| CalWeaveError::ProviderNotFound(id.to_string()))
    }

    /// Authenticate against one provider and list its calendars.
    pub async fn describe_provider(&self, id: &ProviderId) -> CalWeaveResult<CalendarProviderRef> {
        let provider = self.provider(id)?;
        let auth = provider.authenticate().await?;
        let calendars = provider.list_calendars().await?;
        Ok(CalendarProviderRef {
            id: id.clone(),
            kind: provider.kind(),
            auth,
            calendars,
        })
    }

    /// The last committed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn commit(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&snapshot);
        snapshot
    }

    /// Fetch every provider concurrently, merge, detect conflicts and
    /// commit the result as the new snapshot.
    ///
    /// With `abort_on_first_error` the first provider error is returned and
    /// nothing is committed. Without it, failures are collected and the
    /// snapshot is built from whatever succeeded. Cancelling `cancel`
    /// aborts outstanding fetches and commits nothing. Events created by
    /// [`Self::create_from_intent`] after this call started are kept in the
    /// committed snapshot even when the fetched data predates them.
    pub async fn fetch_all(
        &self,
        range: &DateRange,
        cancel: &CancellationToken,
    ) -> CalWeaveResult<FetchOutcome> {
        let providers = self.registered();
        let started_after = self.write_seq.load(Ordering::Acquire);
        tracing::debug!(
            providers = providers.len(),
            from = %range.from_rfc3339(),
            to = %range.to_rfc3339(),
            "fetching"
        );

        let mut tasks = JoinSet::new();
        let mut task_providers = HashMap::new();
        for provider in providers {
            let id = provider.id().clone();
            let range = range.clone();
            let handle = tasks.spawn(async move { provider.fetch_events(&range).await });
            task_providers.insert(handle.id(), id);
        }

        let mut events = Vec::new();
        let mut failures = Vec::new();

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    tracing::info!("fetch cancelled, discarding partial results");
                    return Err(CalWeaveError::Cancelled);
                }
                joined = tasks.join_next_with_id() => joined,
            };
            let Some(joined) = joined else { break };

            let (task, result) = match joined {
                Ok((task, result)) => (task, result),
                Err(e) => (
                    e.id(),
                    Err(CalWeaveError::Provider(format!("fetch task failed: {e}"))),
                ),
            };
            let provider = task_providers
                .remove(&task)
                .unwrap_or_else(|| ProviderId::new("unknown"));

            match result {
                Ok(fetched) => {
                    tracing::debug!(provider = %provider, count = fetched.len(), "fetched");
                    events.extend(fetched);
                }
                Err(error) if self.config.abort_on_first_error => {
                    tasks.abort_all();
                    tracing::warn!(provider = %provider, error = %error, "fetch failed, aborting cycle");
                    return Err(error);
                }
                Err(error) => {
                    tracing::warn!(provider = %provider, error = %error, "fetch failed, continuing");
                    failures.push(ProviderFailure { provider, error });
                }
            }
        }

        let (mut events, rejected) = validated(events);

        let snapshot = {
            let mut writes = self.writer.lock().await;
            if cancel.is_cancelled() {
                return Err(CalWeaveError::Cancelled);
            }

            // Writes made before this fetch started are in what it fetched
            writes.retain(|w| w.seq > started_after);
            let fetched: HashSet<EventRef> = events.iter().map(|e| e.event_ref()).collect();
            let carried: Vec<UnifiedCalendarEvent> = writes
                .iter()
                .filter(|w| !fetched.contains(&w.event.event_ref()) && range.intersects(&w.event))
                .map(|w| w.event.clone())
                .collect();
            if !carried.is_empty() {
                tracing::debug!(count = carried.len(), "carrying events written during the fetch");
                events.extend(carried);
                events.sort_by(conflict::canonical_order);
            }

            let conflicts = conflict::detect(&events);
            self.commit(Snapshot {
                events,
                conflicts,
                range: Some(range.clone()),
                generated_at: Some(self.clock.now()),
            })
        };

        tracing::info!(
            events = snapshot.events.len(),
            conflicts = snapshot.conflicts.len(),
            failures = failures.len(),
            "fetch cycle committed"
        );

        for failure in &failures {
            self.bus.publish(BusEvent::ProviderFailed {
                provider: failure.provider.clone(),
                error: failure.error.to_string(),
            });
        }
        if !snapshot.conflicts.is_empty() {
            self.bus.publish(BusEvent::ConflictsDetected {
                conflicts: snapshot.conflicts.clone(),
            });
        }

        Ok(FetchOutcome {
            snapshot,
            failures,
            rejected,
        })
    }

    /// Turn a captured intent into an event.
    ///
    /// The draft is placed by the scheduler (or at the exact requested time),
    /// checked against the current snapshot, and written back with a single
    /// `create_event` call only when it is free and certain. Otherwise it is
    /// returned as a suggestion with alternatives and nothing is written.
    pub async fn create_from_intent(
        &self,
        intent: &CapturedIntent,
        cancel: &CancellationToken,
    ) -> CalWeaveResult<CaptureOutcome> {
        let mut writes = self.writer.lock().await;

        let target = self.router.target(intent.domain).ok_or_else(|| {
            CalWeaveError::Config(format!("No calendar is mapped for domain '{}'", intent.domain))
        })?;
        let provider = self.provider(&target.provider)?;

        let snapshot = self.snapshot();
        let now = self.clock.now();
        let duration = intent.duration(self.config.default_duration_minutes);
        let buffer = self.config.default_buffer_minutes;

        let proposed = match intent.date_hint.as_ref().and_then(|h| h.exact()) {
            Some(at) => ProposedSlot {
                slot: TimeSlot::new(
                    at,
                    at.checked_add_signed(duration)
                        .ok_or(SchedulingError::OutOfRange)?,
                ),
                confidence: SlotConfidence::Certain,
            },
            None => {
                let start = intent
                    .date_hint
                    .as_ref()
                    .map_or(now, |h| h.earliest().max(now));
                let horizon_end = start
                    .checked_add_signed(Duration::days(i64::from(self.config.search_horizon_days)))
                    .ok_or(SchedulingError::OutOfRange)?;
                self.scheduler.find_slot(
                    duration,
                    intent.domain,
                    &snapshot.events,
                    TimeSlot::new(start, horizon_end),
                    buffer,
                )?
            }
        };

        if !proposed.is_certain() && !self.config.low_confidence_fallback {
            tracing::info!(domain = %intent.domain, "no slot inside the search horizon");
            return Err(SchedulingError::NoSlotFound.into());
        }

        let mut draft = UnifiedCalendarEvent::draft(
            intent.title(),
            proposed.slot,
            target.provider.clone(),
            target.calendar_id.clone(),
        );
        draft.apply_buffer(buffer);
        draft.reminder_minutes = self.config.reminder_minutes;

        let mut merged = snapshot.events.clone();
        merged.push(draft.clone());
        let draft_ref = draft.event_ref();
        let new_conflicts: Vec<CalendarConflict> = conflict::detect(&merged)
            .into_iter()
            .filter(|c| c.involves(&draft_ref))
            .collect();
        // An exact time can clear every event yet still land inside a buffer
        let clear = new_conflicts.is_empty()
            && self
                .scheduler
                .is_free(proposed.slot, &snapshot.events, buffer);

        if !clear || !proposed.is_certain() {
            let alternatives = self.scheduler.find_alternatives(
                &draft,
                intent.domain,
                &snapshot.events,
                &new_conflicts,
                now,
            );
            draft.alternatives = alternatives.clone();

            tracing::info!(
                draft = %draft,
                conflicts = new_conflicts.len(),
                alternatives = alternatives.len(),
                "suggesting instead of writing"
            );
            self.bus.publish(BusEvent::EventSuggested {
                draft: draft.clone(),
                conflicts: new_conflicts.clone(),
                alternatives: alternatives.clone(),
                confidence: proposed.confidence,
            });
            return Ok(CaptureOutcome::Suggested {
                draft,
                conflicts: new_conflicts,
                alternatives,
                confidence: proposed.confidence,
            });
        }

        // Not idempotent on the provider side: exactly one call per capture
        let provider_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CalWeaveError::Cancelled),
            created = provider.create_event(&draft) => created?,
        };
        let event = draft.committed(provider_id);
        tracing::info!(event = %event, id = %event.id, provider = %event.provider, "event created");

        let mut events = snapshot.events.clone();
        events.push(event.clone());
        events.sort_by(conflict::canonical_order);
        let conflicts = conflict::detect(&events);
        self.commit(Snapshot {
            events,
            conflicts,
            range: snapshot.range.clone(),
            generated_at: Some(now),
        });
        let seq = self.write_seq.fetch_add(1, Ordering::AcqRel) + 1;
        writes.push(LocalWrite {
            seq,
            event: event.clone(),
        });

        if let Err(e) = self.store.save(&event).await {
            tracing::warn!(event = %event.id, error = %e, "could not persist created event");
        }

        self.bus.publish(BusEvent::EventCreated {
            event: event.clone(),
        });
        Ok(CaptureOutcome::Created(event))
    }
}

/// Drop events the detector can't reason about, then sort canonically.
fn validated(
    events: Vec<UnifiedCalendarEvent>,
) -> (Vec<UnifiedCalendarEvent>, Vec<CalWeaveError>) {
    let mut valid = Vec::with_capacity(events.len());
    let mut rejected = Vec::new();
    for event in events {
        match event.validate() {
            Ok(()) => valid.push(event),
            Err(e) => {
                tracing::warn!(provider = %event.provider, error = %e, "rejecting malformed event");
                rejected.push(e);
            }
        }
    }
    valid.sort_by(conflict::canonical_order);
    (valid, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusEventKind, Priority};
    use crate::clock::FakeClock;
    use crate::conflict::{ConflictKind, Severity};
    use crate::error::NetworkError;
    use crate::event::{EventOrigin, EventTime};
    use crate::intent::{DateHint, DomainTag};
    use crate::provider::protocol::ErrorCode;
    use crate::provider::{InMemoryProvider, ProviderKind};
    use crate::routing::CalendarTarget;
    use crate::store::JsonDirStore;
    use chrono::TimeZone;
    use std::sync::Mutex as StdMutex;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, h, m, 0).unwrap()
    }

    fn event(id: &str, title: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> UnifiedCalendarEvent {
        UnifiedCalendarEvent {
            id: id.to_string(),
            title: title.to_string(),
            start: EventTime::DateTime(start),
            end: EventTime::DateTime(end),
            location: None,
            notes: None,
            provider: ProviderId::new("unset"),
            calendar_id: "primary".to_string(),
            buffer_minutes: 0,
            reminder_minutes: 0,
            alternatives: Vec::new(),
            origin: EventOrigin::Provider,
        }
    }

    fn memory(id: &str) -> Arc<InMemoryProvider> {
        Arc::new(InMemoryProvider::new(ProviderId::new(id), ProviderKind::FirstParty))
    }

    fn range() -> DateRange {
        DateRange::new(at(20, 0, 0), at(27, 0, 0))
    }

    /// Collects bus events of one kind.
    fn record(bus: &EventBus, kind: BusEventKind) -> Arc<StdMutex<Vec<BusEvent>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        // Stays subscribed until cancelled; dropping the token is fine
        let _ = bus.subscribe(kind, Priority::Urgent, move |e| {
            sink.lock().unwrap().push(e.clone());
            Ok(())
        });
        seen
    }

    fn manager(config: ManagerConfig) -> CalendarManager {
        CalendarManager::new(config, EventBus::new())
            .with_clock(Arc::new(FakeClock::new(at(20, 8, 0))))
    }

    fn resilient() -> ManagerConfig {
        ManagerConfig {
            abort_on_first_error: false,
            ..ManagerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_cross_calendar_overlap_is_reported() {
        let manager = manager(ManagerConfig::default());
        let detected = record(manager.bus(), BusEventKind::ConflictsDetected);

        let a = memory("a");
        a.insert(event("1", "Dentist", at(20, 15, 0), at(20, 16, 0)));
        let b = memory("b");
        b.insert(event("2", "Standup", at(20, 15, 30), at(20, 16, 0)));
        manager.add_provider(a).unwrap();
        manager.add_provider(b).unwrap();

        let outcome = manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.snapshot.events.len(), 2);
        assert_eq!(outcome.snapshot.conflicts.len(), 1);
        let conflict = &outcome.snapshot.conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::CrossCalendar);
        assert_eq!(conflict.severity, Severity::Medium);
        assert!(conflict.involves(&EventRef::new("a", "1")));
        assert!(conflict.involves(&EventRef::new("b", "2")));

        assert_eq!(detected.lock().unwrap().len(), 1);
        assert!(Arc::ptr_eq(&outcome.snapshot, &manager.snapshot()));
    }

    #[tokio::test]
    async fn test_shared_event_id_across_providers() {
        let manager = manager(ManagerConfig::default());

        let a = memory("a");
        a.insert(event("1", "Dentist", at(20, 15, 0), at(20, 16, 0)));
        let b = memory("b");
        b.insert(event("1", "Standup", at(20, 15, 30), at(20, 16, 0)));
        manager.add_provider(a).unwrap();
        manager.add_provider(b).unwrap();

        let outcome = manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap();

        let conflict = &outcome.snapshot.conflicts[0];
        assert_eq!(
            conflict.event_ids,
            vec![EventRef::new("a", "1"), EventRef::new("b", "1")]
        );
        let titles: Vec<_> = conflict
            .event_ids
            .iter()
            .filter_map(|key| outcome.snapshot.event(key))
            .map(|e| e.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Dentist", "Standup"]);
    }

    #[tokio::test]
    async fn test_no_conflicts_means_no_publish() {
        let manager = manager(ManagerConfig::default());
        let detected = record(manager.bus(), BusEventKind::ConflictsDetected);

        let a = memory("a");
        a.insert(event("1", "Focus", at(20, 9, 0), at(20, 10, 0)));
        a.insert(event("2", "Lunch", at(20, 10, 0), at(20, 11, 0)));
        manager.add_provider(a).unwrap();

        let outcome = manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.snapshot.conflicts.is_empty());
        assert!(detected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_error_aborts_the_cycle() {
        let manager = manager(ManagerConfig::default());

        let good = memory("good");
        good.insert(event("1", "Dentist", at(20, 15, 0), at(20, 16, 0)));
        let offline = memory("offline");
        offline.fail_fetch(Some(ErrorCode::Offline));
        manager.add_provider(good).unwrap();
        manager.add_provider(offline).unwrap();

        let err = manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CalWeaveError::Network(NetworkError::Offline)));
        assert!(manager.snapshot().range.is_none());
    }

    #[tokio::test]
    async fn test_resilient_fetch_keeps_partial_results() {
        let manager = manager(resilient());
        let failed = record(manager.bus(), BusEventKind::ProviderFailed);

        let good = memory("good");
        good.insert(event("1", "Dentist", at(20, 15, 0), at(20, 16, 0)));
        let offline = memory("offline");
        offline.fail_fetch(Some(ErrorCode::Offline));
        manager.add_provider(good).unwrap();
        manager.add_provider(offline).unwrap();

        let outcome = manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.snapshot.events.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].provider, ProviderId::new("offline"));
        assert!(matches!(
            outcome.failures[0].error,
            CalWeaveError::Network(NetworkError::Offline)
        ));
        assert_eq!(failed.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_does_not_depend_on_who_answers_first() {
        let manager = manager(ManagerConfig::default());

        let slow = memory("slow");
        slow.insert(event("s", "Alpha", at(20, 9, 0), at(20, 10, 0)));
        slow.delay_fetch(Some(std::time::Duration::from_secs(5)));
        let fast = memory("fast");
        fast.insert(event("f", "Beta", at(20, 11, 0), at(20, 12, 0)));
        fast.insert(event("g", "Alpha", at(20, 9, 0), at(20, 9, 30)));
        manager.add_provider(slow).unwrap();
        manager.add_provider(fast).unwrap();

        let first = manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<_> = first.snapshot.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["g", "s", "f"]);

        let second = manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.snapshot.events, second.snapshot.events);
        assert_eq!(first.snapshot.conflicts, second.snapshot.conflicts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_partial_results() {
        let manager = manager(ManagerConfig::default());

        let fast = memory("fast");
        fast.insert(event("1", "Dentist", at(20, 15, 0), at(20, 16, 0)));
        let slow = memory("slow");
        slow.delay_fetch(Some(std::time::Duration::from_secs(60)));
        manager.add_provider(fast).unwrap();
        manager.add_provider(slow).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = manager.fetch_all(&range(), &cancel).await.unwrap_err();

        assert!(matches!(err, CalWeaveError::Cancelled));
        assert!(manager.snapshot().events.is_empty());
        assert!(manager.snapshot().range.is_none());
    }

    #[tokio::test]
    async fn test_malformed_events_are_rejected() {
        let manager = manager(ManagerConfig::default());

        let a = memory("a");
        a.insert(event("ok", "Fine", at(20, 9, 0), at(20, 10, 0)));
        a.insert(event("bad", "Backwards", at(20, 12, 0), at(20, 11, 0)));
        a.insert(event("empty", "Zero", at(20, 13, 0), at(20, 13, 0)));
        manager.add_provider(a).unwrap();

        let outcome = manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.snapshot.events.len(), 1);
        assert_eq!(outcome.rejected.len(), 2);
        assert!(outcome.snapshot.conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_provider_is_rejected() {
        let manager = manager(ManagerConfig::default());
        let added = record(manager.bus(), BusEventKind::ProviderAdded);

        manager.add_provider(memory("a")).unwrap();
        assert!(manager.add_provider(memory("a")).is_err());

        assert_eq!(added.lock().unwrap().len(), 1);
        assert_eq!(manager.provider_ids(), vec![ProviderId::new("a")]);
    }

    fn capture_manager(config: ManagerConfig, provider: Arc<InMemoryProvider>) -> CalendarManager {
        let router = StaticDomainRouter::new()
            .route(DomainTag::Work, CalendarTarget::new(provider.id().as_str(), "primary"));
        let manager = manager(config).with_router(Arc::new(router));
        manager.add_provider(provider).unwrap();
        manager
    }

    #[tokio::test]
    async fn test_free_slot_is_written_exactly_once() {
        let provider = memory("work");
        let manager = capture_manager(ManagerConfig::default(), Arc::clone(&provider));
        let created = record(manager.bus(), BusEventKind::EventCreated);
        let suggested = record(manager.bus(), BusEventKind::EventSuggested);

        let intent = CapturedIntent::new("Write report", DomainTag::Work).with_duration("1h");
        let outcome = manager
            .create_from_intent(&intent, &CancellationToken::new())
            .await
            .unwrap();

        let CaptureOutcome::Created(event) = outcome else {
            panic!("expected the event to be created");
        };
        assert_eq!(provider.create_calls(), 1);
        assert_eq!(event.id, "work-1");
        assert!(!event.is_draft());
        assert_eq!(event.start_utc(), at(20, 8, 0));
        assert_eq!(event.end_utc(), at(20, 9, 0));
        assert_eq!(event.buffer_minutes, 15);
        assert_eq!(event.reminder_minutes, 10);

        assert_eq!(created.lock().unwrap().len(), 1);
        assert!(suggested.lock().unwrap().is_empty());
        assert!(manager.snapshot().event(&EventRef::new("work", "work-1")).is_some());
    }

    #[tokio::test]
    async fn test_slot_respects_existing_buffers() {
        let provider = memory("work");
        let mut busy = event("b", "Standup", at(20, 8, 0), at(20, 9, 0));
        busy.apply_buffer(15);
        provider.insert(busy);
        let manager = capture_manager(ManagerConfig::default(), Arc::clone(&provider));
        manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap();

        let intent = CapturedIntent::new("Review", DomainTag::Work).with_duration("30m");
        let outcome = manager
            .create_from_intent(&intent, &CancellationToken::new())
            .await
            .unwrap();

        let CaptureOutcome::Created(event) = outcome else {
            panic!("expected the event to be created");
        };
        assert_eq!(event.start_utc(), at(20, 9, 15));
    }

    #[tokio::test]
    async fn test_exact_time_collision_is_suggested_not_written() {
        let provider = memory("work");
        provider.insert(event("b", "Standup", at(20, 15, 0), at(20, 16, 0)));
        let manager = capture_manager(ManagerConfig::default(), Arc::clone(&provider));
        manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap();
        let suggested = record(manager.bus(), BusEventKind::EventSuggested);
        let created = record(manager.bus(), BusEventKind::EventCreated);

        let intent = CapturedIntent::new("Call Sam", DomainTag::Work)
            .with_duration("1h")
            .with_date(DateHint::At(at(20, 15, 30)));

        for _ in 0..2 {
            let outcome = manager
                .create_from_intent(&intent, &CancellationToken::new())
                .await
                .unwrap();
            let CaptureOutcome::Suggested {
                draft,
                conflicts,
                alternatives,
                confidence,
            } = outcome
            else {
                panic!("expected a suggestion");
            };

            assert!(draft.is_draft());
            assert_eq!(draft.buffer_minutes, 15);
            assert_eq!(draft.occupied_until(), at(20, 16, 45));
            assert_eq!(confidence, SlotConfidence::Certain);
            assert_eq!(conflicts.len(), 1);
            assert!(conflicts[0].involves(&EventRef::new("work", "b")));
            assert!(!alternatives.is_empty());
            assert!(alternatives.len() <= crate::scheduler::MAX_ALTERNATIVES);
            assert_eq!(draft.alternatives, alternatives);
        }

        assert_eq!(provider.create_calls(), 0);
        assert_eq!(suggested.lock().unwrap().len(), 2);
        assert!(created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_horizon_falls_back_to_low_confidence() {
        let provider = memory("work");
        provider.insert(event("wall", "Offsite", at(20, 0, 0), at(30, 0, 0)));
        let config = ManagerConfig {
            search_horizon_days: 2,
            ..ManagerConfig::default()
        };
        let manager = capture_manager(config, Arc::clone(&provider));
        manager
            .fetch_all(
                &DateRange::new(at(19, 0, 0), at(31, 0, 0)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let intent = CapturedIntent::new("Plan Q2", DomainTag::Work);
        let outcome = manager
            .create_from_intent(&intent, &CancellationToken::new())
            .await
            .unwrap();

        let CaptureOutcome::Suggested {
            draft, confidence, ..
        } = outcome
        else {
            panic!("expected a suggestion");
        };
        assert_eq!(confidence, SlotConfidence::Low);
        assert_eq!(draft.start_utc(), at(30, 0, 0));
        assert_eq!(provider.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_fallback_means_no_slot_found() {
        let provider = memory("work");
        provider.insert(event("wall", "Offsite", at(20, 0, 0), at(30, 0, 0)));
        let config = ManagerConfig {
            search_horizon_days: 2,
            low_confidence_fallback: false,
            ..ManagerConfig::default()
        };
        let manager = capture_manager(config, Arc::clone(&provider));
        manager
            .fetch_all(
                &DateRange::new(at(19, 0, 0), at(31, 0, 0)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let err = manager
            .create_from_intent(
                &CapturedIntent::new("Plan Q2", DomainTag::Work),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CalWeaveError::Scheduling(SchedulingError::NoSlotFound)
        ));
    }

    #[tokio::test]
    async fn test_unmapped_domain_and_unknown_provider() {
        let manager = manager(ManagerConfig::default()).with_router(Arc::new(
            StaticDomainRouter::new().route(DomainTag::Work, CalendarTarget::new("ghost", "primary")),
        ));

        let err = manager
            .create_from_intent(
                &CapturedIntent::new("Gym", DomainTag::Health),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CalWeaveError::Config(_)));

        let err = manager
            .create_from_intent(
                &CapturedIntent::new("Sync", DomainTag::Work),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CalWeaveError::ProviderNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_create_failure_is_surfaced_and_nothing_published() {
        let provider = memory("work");
        provider.fail_create(Some("quota exceeded"));
        let manager = capture_manager(ManagerConfig::default(), Arc::clone(&provider));
        let created = record(manager.bus(), BusEventKind::EventCreated);

        let err = manager
            .create_from_intent(
                &CapturedIntent::new("Sync", DomainTag::Work),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(provider.create_calls(), 1);
        assert!(created.lock().unwrap().is_empty());
        assert!(manager.snapshot().events.is_empty());
    }

    #[tokio::test]
    async fn test_created_event_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let provider = memory("work");
        let manager = capture_manager(ManagerConfig::default(), Arc::clone(&provider))
            .with_store(Arc::new(JsonDirStore::new(dir.path())));

        manager
            .create_from_intent(
                &CapturedIntent::new("Write report", DomainTag::Work),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(dir.path().join("2025-03-20T0800__write-report.json").exists());
    }

    #[tokio::test]
    async fn test_date_hints_never_start_before_now() {
        let provider = memory("work");
        let manager = capture_manager(ManagerConfig::default(), Arc::clone(&provider));

        let past_day = CapturedIntent::new("Stretch", DomainTag::Work)
            .with_date(DateHint::Day(chrono::NaiveDate::from_ymd_opt(2025, 3, 18).unwrap()));
        let outcome = manager
            .create_from_intent(&past_day, &CancellationToken::new())
            .await
            .unwrap();
        let CaptureOutcome::Created(event) = outcome else {
            panic!("expected the event to be created");
        };
        assert_eq!(event.start_utc(), at(20, 8, 0));

        let later = CapturedIntent::new("Plan sprint", DomainTag::Work)
            .with_date(DateHint::NotBefore(at(22, 13, 0)));
        let outcome = manager
            .create_from_intent(&later, &CancellationToken::new())
            .await
            .unwrap();
        let CaptureOutcome::Created(event) = outcome else {
            panic!("expected the event to be created");
        };
        assert_eq!(event.start_utc(), at(22, 13, 0));
        assert_eq!(provider.create_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_write_back_publishes_nothing() {
        let provider = memory("work");
        provider.delay_create(Some(std::time::Duration::from_secs(60)));
        let manager = capture_manager(ManagerConfig::default(), Arc::clone(&provider));
        let created = record(manager.bus(), BusEventKind::EventCreated);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = manager
            .create_from_intent(&CapturedIntent::new("Sync", DomainTag::Work), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, CalWeaveError::Cancelled));
        assert_eq!(provider.create_calls(), 1);
        assert!(provider.events().is_empty());
        assert!(created.lock().unwrap().is_empty());
        assert!(manager.snapshot().events.is_empty());
    }

    #[tokio::test]
    async fn test_exact_time_inside_a_buffer_is_suggested() {
        let provider = memory("work");
        let mut standup = event("b", "Standup", at(20, 9, 0), at(20, 10, 0));
        standup.apply_buffer(15);
        provider.insert(standup);
        provider.insert(event("c", "Review", at(20, 11, 0), at(20, 12, 0)));
        let manager = capture_manager(ManagerConfig::default(), Arc::clone(&provider));
        manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap();

        // Inside the standup's buffer, then trailing buffer running into the review
        for start in [at(20, 10, 5), at(20, 10, 30)] {
            let intent = CapturedIntent::new("Call Sam", DomainTag::Work)
                .with_duration("30m")
                .with_date(DateHint::At(start));
            let outcome = manager
                .create_from_intent(&intent, &CancellationToken::new())
                .await
                .unwrap();

            let CaptureOutcome::Suggested {
                draft, conflicts, ..
            } = outcome
            else {
                panic!("expected a suggestion for {start}");
            };
            assert_eq!(draft.start_utc(), start);
            assert!(conflicts.is_empty());
        }
        assert_eq!(provider.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_times_are_errors() {
        let provider = memory("work");
        let manager = capture_manager(ManagerConfig::default(), Arc::clone(&provider));
        let intent = CapturedIntent::new("Someday", DomainTag::Work)
            .with_date(DateHint::At(DateTime::<Utc>::MAX_UTC - Duration::minutes(30)));

        let err = manager
            .create_from_intent(&intent, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CalWeaveError::Scheduling(SchedulingError::OutOfRange)
        ));

        let config = ManagerConfig {
            search_horizon_days: u32::MAX,
            ..ManagerConfig::default()
        };
        let manager = capture_manager(config, Arc::clone(&provider));
        let err = manager
            .create_from_intent(
                &CapturedIntent::new("Someday", DomainTag::Work),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CalWeaveError::Scheduling(SchedulingError::OutOfRange)
        ));
        assert_eq!(provider.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_absurd_duration_uses_the_default() {
        let provider = memory("work");
        let manager = capture_manager(ManagerConfig::default(), Arc::clone(&provider));

        let intent = CapturedIntent::new("Forever", DomainTag::Work).with_duration("1000000years");
        let outcome = manager
            .create_from_intent(&intent, &CancellationToken::new())
            .await
            .unwrap();

        let CaptureOutcome::Created(event) = outcome else {
            panic!("expected the event to be created");
        };
        assert_eq!(event.slot(), TimeSlot::new(at(20, 8, 0), at(20, 9, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_written_during_a_fetch_survives_its_commit() {
        let work = memory("work");
        let slow = memory("slow");
        slow.insert(event("s", "Gym", at(21, 7, 0), at(21, 8, 0)));
        slow.delay_fetch(Some(std::time::Duration::from_secs(5)));
        let manager = capture_manager(ManagerConfig::default(), Arc::clone(&work));
        manager.add_provider(slow).unwrap();

        let cancel = CancellationToken::new();
        let intent = CapturedIntent::new("Write report", DomainTag::Work);
        let fetch_range = range();
        let (fetched, captured) = tokio::join!(manager.fetch_all(&fetch_range, &cancel), async {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            manager.create_from_intent(&intent, &cancel).await
        });

        let CaptureOutcome::Created(created) = captured.unwrap() else {
            panic!("expected the event to be created");
        };
        let snapshot = fetched.unwrap().snapshot;
        assert!(snapshot.event(&created.event_ref()).is_some());
        assert!(snapshot.event(&EventRef::new("slow", "s")).is_some());
        assert!(Arc::ptr_eq(&snapshot, &manager.snapshot()));

        // A later fetch sees the event at the provider and carries nothing extra
        let refetched = manager
            .fetch_all(&range(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(refetched.snapshot.events.len(), 2);
    }
}
