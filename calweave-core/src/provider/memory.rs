//! In-process provider backed by a plain event list.
//!
//! Used for local-only calendars (optionally seeded from a JSON file) and
//! as the adapter under test for the manager. Failures and latency can be
//! injected per operation.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::date_range::DateRange;
use crate::error::{CalWeaveError, CalWeaveResult, CalendarError};
use crate::event::{ProviderId, UnifiedCalendarEvent};
use crate::provider::protocol::ErrorCode;
use crate::provider::{AuthState, CalendarInfo, CalendarProvider, ProviderKind};

pub const DEFAULT_CALENDAR_ID: &str = "primary";

struct MemoryState {
    events: Vec<UnifiedCalendarEvent>,
    calendars: Vec<CalendarInfo>,
    auth: AuthState,
    next_id: u64,
    create_calls: usize,
    fetch_failure: Option<ErrorCode>,
    auth_failure: Option<ErrorCode>,
    create_failure: Option<String>,
    fetch_delay: Option<Duration>,
    create_delay: Option<Duration>,
}

pub struct InMemoryProvider {
    id: ProviderId,
    kind: ProviderKind,
    state: Mutex<MemoryState>,
}

impl InMemoryProvider {
    pub fn new(id: ProviderId, kind: ProviderKind) -> Self {
        InMemoryProvider {
            id,
            kind,
            state: Mutex::new(MemoryState {
                events: Vec::new(),
                calendars: vec![CalendarInfo {
                    id: DEFAULT_CALENDAR_ID.to_string(),
                    title: "Primary".to_string(),
                    is_default: true,
                }],
                auth: AuthState::Unauthenticated,
                next_id: 1,
                create_calls: 0,
                fetch_failure: None,
                auth_failure: None,
                create_failure: None,
                fetch_delay: None,
                create_delay: None,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_events(self, events: Vec<UnifiedCalendarEvent>) -> Self {
        for event in events {
            self.insert(event);
        }
        self
    }

    /// Store a mirror event as-is, claiming it for this provider.
    pub fn insert(&self, mut event: UnifiedCalendarEvent) {
        event.provider = self.id.clone();
        self.state().events.push(event);
    }

    pub fn add_calendar(&self, calendar: CalendarInfo) {
        self.state().calendars.push(calendar);
    }

    /// Load a JSON array of events.
    pub fn load_seed(&self, path: &Path) -> CalWeaveResult<()> {
        let path = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        let content = std::fs::read_to_string(&path)?;
        let events: Vec<UnifiedCalendarEvent> = serde_json::from_str(&content)
            .map_err(|e| CalWeaveError::Serialization(format!("{}: {}", path, e)))?;
        tracing::debug!(provider = %self.id, count = events.len(), seed = %path, "seeded provider");
        for event in events {
            self.insert(event);
        }
        Ok(())
    }

    pub fn events(&self) -> Vec<UnifiedCalendarEvent> {
        self.state().events.clone()
    }

    /// Number of `create_event` calls received, successful or not.
    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    pub fn fail_fetch(&self, code: Option<ErrorCode>) {
        self.state().fetch_failure = code;
    }

    pub fn fail_auth(&self, code: Option<ErrorCode>) {
        self.state().auth_failure = code;
    }

    pub fn fail_create(&self, reason: Option<&str>) {
        self.state().create_failure = reason.map(String::from);
    }

    pub fn delay_fetch(&self, delay: Option<Duration>) {
        self.state().fetch_delay = delay;
    }

    /// Hold `create_event` open before it stores anything.
    pub fn delay_create(&self, delay: Option<Duration>) {
        self.state().create_delay = delay;
    }
}

#[async_trait]
impl CalendarProvider for InMemoryProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn authenticate(&self) -> CalWeaveResult<AuthState> {
        let mut state = self.state();
        if let Some(code) = state.auth_failure {
            state.auth = AuthState::Unauthenticated;
            return Err(code.into_error());
        }
        state.auth = AuthState::Authenticated;
        Ok(state.auth)
    }

    async fn fetch_events(&self, range: &DateRange) -> CalWeaveResult<Vec<UnifiedCalendarEvent>> {
        let delay = self.state().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        if let Some(code) = state.fetch_failure {
            return Err(code.into_error());
        }
        Ok(state
            .events
            .iter()
            .filter(|e| range.intersects(e))
            .cloned()
            .collect())
    }

    async fn create_event(&self, draft: &UnifiedCalendarEvent) -> CalWeaveResult<String> {
        let delay = {
            let mut state = self.state();
            state.create_calls += 1;
            state.create_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();

        if let Some(reason) = &state.create_failure {
            return Err(CalendarError::CreateFailed(reason.clone()).into());
        }
        if !state.calendars.iter().any(|c| c.id == draft.calendar_id) {
            return Err(CalWeaveError::CalendarNotFound(draft.calendar_id.clone()));
        }

        let id = format!("{}-{}", self.id, state.next_id);
        state.next_id += 1;

        let mut stored = draft.clone().committed(id.clone());
        stored.provider = self.id.clone();
        state.events.push(stored);
        Ok(id)
    }

    async fn update_event(&self, event: &UnifiedCalendarEvent) -> CalWeaveResult<()> {
        let mut state = self.state();
        let slot = state
            .events
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or_else(|| CalWeaveError::Provider(format!("No event with id '{}'", event.id)))?;
        *slot = event.clone();
        slot.provider = self.id.clone();
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> CalWeaveResult<()> {
        let mut state = self.state();
        let before = state.events.len();
        state.events.retain(|e| e.id != event_id);
        if state.events.len() == before {
            return Err(CalWeaveError::Provider(format!("No event with id '{}'", event_id)));
        }
        Ok(())
    }

    async fn list_calendars(&self) -> CalWeaveResult<Vec<CalendarInfo>> {
        Ok(self.state().calendars.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, NetworkError};
    use crate::event::TimeSlot;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    fn provider() -> InMemoryProvider {
        InMemoryProvider::new(ProviderId::new("home"), ProviderKind::SecondParty)
    }

    fn draft(title: &str, h: u32) -> UnifiedCalendarEvent {
        UnifiedCalendarEvent::draft(
            title,
            TimeSlot::new(
                Utc.with_ymd_and_hms(2025, 3, 20, h, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 3, 20, h + 1, 0, 0).unwrap(),
            ),
            ProviderId::new("home"),
            DEFAULT_CALENDAR_ID,
        )
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_is_not_idempotent() {
        let p = provider();
        let e = draft("Yoga", 7);

        let first = p.create_event(&e).await.unwrap();
        let second = p.create_event(&e).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(p.create_calls(), 2);
        assert_eq!(p.events().len(), 2);
        assert!(p.events().iter().all(|e| !e.is_draft()));
    }

    #[tokio::test]
    async fn test_fetch_filters_by_range() {
        let p = provider().with_events(vec![draft("Early", 7), draft("Late", 20)]);
        let range = DateRange::new(
            Utc.with_ymd_and_hms(2025, 3, 20, 6, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 20, 12, 0, 0).unwrap(),
        );

        let events = p.fetch_events(&range).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Early");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let p = provider();
        p.fail_fetch(Some(ErrorCode::RateLimited));
        p.fail_auth(Some(ErrorCode::AccessDenied));
        p.fail_create(Some("quota"));

        assert!(matches!(
            p.fetch_events(&DateRange::default()).await,
            Err(CalWeaveError::Network(NetworkError::RateLimited))
        ));
        assert!(matches!(
            p.authenticate().await,
            Err(CalWeaveError::Auth(AuthError::AccessDenied))
        ));
        assert!(matches!(
            p.create_event(&draft("X", 9)).await,
            Err(CalWeaveError::Calendar(CalendarError::CreateFailed(_)))
        ));
        assert_eq!(p.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let p = provider();
        let id = p.create_event(&draft("Run", 6)).await.unwrap();

        let mut event = p.events()[0].clone();
        event.title = "Long run".into();
        p.update_event(&event).await.unwrap();
        assert_eq!(p.events()[0].title, "Long run");

        p.delete_event(&id).await.unwrap();
        assert!(p.events().is_empty());
        assert!(p.delete_event(&id).await.is_err());
    }

    #[test]
    fn test_load_seed_claims_events() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut seeded = draft("Seeded", 10);
        seeded.provider = ProviderId::new("elsewhere");
        write!(file, "{}", serde_json::to_string(&vec![seeded]).unwrap()).unwrap();

        let p = provider();
        p.load_seed(file.path()).unwrap();

        assert_eq!(p.events().len(), 1);
        assert_eq!(p.events()[0].provider, ProviderId::new("home"));
    }
}
