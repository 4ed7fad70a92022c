//! Provider adapter contract and the built-in backends.
//!
//! The core only talks to calendars through [`CalendarProvider`]. Which
//! implementation backs a provider is decided by configuration
//! ([`ProviderBackend`]), never by inspecting types at runtime.

pub mod memory;
pub mod protocol;
pub mod subprocess;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderBackend, ProviderConfig};
use crate::date_range::DateRange;
use crate::error::CalWeaveResult;
use crate::event::{ProviderId, UnifiedCalendarEvent};

pub use memory::InMemoryProvider;
pub use subprocess::SubprocessProvider;

/// Which party owns the backing service, abstracted from named vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    FirstParty,
    SecondParty,
    ThirdParty,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::FirstParty => write!(f, "first-party"),
            ProviderKind::SecondParty => write!(f, "second-party"),
            ProviderKind::ThirdParty => write!(f, "third-party"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated,
}

/// A sub-calendar inside a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub is_default: bool,
}

/// What the manager knows about a registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarProviderRef {
    pub id: ProviderId,
    pub kind: ProviderKind,
    pub auth: AuthState,
    pub calendars: Vec<CalendarInfo>,
}

impl CalendarProviderRef {
    pub fn default_calendar(&self) -> Option<&CalendarInfo> {
        self.calendars
            .iter()
            .find(|c| c.is_default)
            .or_else(|| self.calendars.first())
    }
}

/// Capability contract every calendar backend satisfies.
///
/// Each call is an independent future; dropping it cancels the call.
/// `create_event` is not idempotent: calling it twice creates two events.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    fn kind(&self) -> ProviderKind;

    /// Fails with `AuthError::NotAuthenticated` or `AuthError::AccessDenied`.
    async fn authenticate(&self) -> CalWeaveResult<AuthState>;

    /// Events whose interval intersects `range`.
    /// Fails with `NetworkError::Offline` or `NetworkError::RateLimited`.
    async fn fetch_events(&self, range: &DateRange) -> CalWeaveResult<Vec<UnifiedCalendarEvent>>;

    /// Returns the provider-assigned id.
    async fn create_event(&self, draft: &UnifiedCalendarEvent) -> CalWeaveResult<String>;

    async fn update_event(&self, event: &UnifiedCalendarEvent) -> CalWeaveResult<()>;

    async fn delete_event(&self, event_id: &str) -> CalWeaveResult<()>;

    async fn list_calendars(&self) -> CalWeaveResult<Vec<CalendarInfo>>;
}

/// Build the adapter a config entry selects.
pub fn from_config(config: &ProviderConfig) -> CalWeaveResult<Arc<dyn CalendarProvider>> {
    let id = ProviderId::new(config.id.as_str());
    let provider: Arc<dyn CalendarProvider> = match &config.backend {
        ProviderBackend::Subprocess { name, params } => Arc::new(SubprocessProvider::new(
            id,
            config.kind,
            name,
            params.clone(),
        )),
        ProviderBackend::Memory { seed } => {
            let provider = InMemoryProvider::new(id, config.kind);
            if let Some(path) = seed {
                provider.load_seed(path)?;
            }
            Arc::new(provider)
        }
    };
    Ok(provider)
}
