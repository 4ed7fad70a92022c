//! Defines the JSON protocol used between calweave and provider binaries
//! over stdin/stdout.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{AuthError, CalWeaveError, NetworkError};
use crate::event::UnifiedCalendarEvent;
use crate::provider::{AuthState, CalendarInfo};

pub trait ProviderCommand: Serialize {
    type Response: DeserializeOwned;
    fn command() -> Command;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Authenticate,
    ListCalendars,
    ListEvents,
    CreateEvent,
    UpdateEvent,
    DeleteEvent,
}

impl Command {
    /// Authentication may wait on the user; everything else is a data call.
    pub fn is_interactive(&self) -> bool {
        matches!(self, Command::Authenticate)
    }
}

/// Machine-readable failure class a provider may attach to an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotAuthenticated,
    AccessDenied,
    Offline,
    RateLimited,
}

impl ErrorCode {
    pub fn into_error(self) -> CalWeaveError {
        match self {
            ErrorCode::NotAuthenticated => AuthError::NotAuthenticated.into(),
            ErrorCode::AccessDenied => AuthError::AccessDenied.into(),
            ErrorCode::Offline => NetworkError::Offline.into(),
            ErrorCode::RateLimited => NetworkError::RateLimited.into(),
        }
    }
}

/// Request sent from calweave to provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Response sent from provider to calweave.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response<T> {
    Success {
        data: T,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl<T> Response<T> {
    pub fn into_result(self) -> Result<T, CalWeaveError> {
        match self {
            Response::Success { data } => Ok(data),
            Response::Error {
                code: Some(code), ..
            } => Err(code.into_error()),
            Response::Error { error, code: None } => Err(CalWeaveError::Provider(error)),
        }
    }
}

/// Provider-specific parameters from config, passed through untouched.
pub type RemoteParams = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Serialize, Deserialize)]
pub struct Authenticate {
    #[serde(flatten)]
    pub params: RemoteParams,
}

impl ProviderCommand for Authenticate {
    type Response = AuthState;
    fn command() -> Command {
        Command::Authenticate
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListCalendars {
    #[serde(flatten)]
    pub params: RemoteParams,
}

impl ProviderCommand for ListCalendars {
    type Response = Vec<CalendarInfo>;
    fn command() -> Command {
        Command::ListCalendars
    }
}

/// List events within a time range.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListEvents {
    #[serde(flatten)]
    pub params: RemoteParams,
    pub from: String,
    pub to: String,
}

impl ProviderCommand for ListEvents {
    type Response = Vec<UnifiedCalendarEvent>;
    fn command() -> Command {
        Command::ListEvents
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateEvent {
    #[serde(flatten)]
    pub params: RemoteParams,
    pub event: UnifiedCalendarEvent,
}

impl ProviderCommand for CreateEvent {
    /// Provider-assigned event id
    type Response = String;
    fn command() -> Command {
        Command::CreateEvent
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateEvent {
    #[serde(flatten)]
    pub params: RemoteParams,
    pub event: UnifiedCalendarEvent,
}

impl ProviderCommand for UpdateEvent {
    type Response = ();
    fn command() -> Command {
        Command::UpdateEvent
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteEvent {
    #[serde(flatten)]
    pub params: RemoteParams,
    pub event_id: String,
}

impl ProviderCommand for DeleteEvent {
    type Response = ();
    fn command() -> Command {
        Command::DeleteEvent
    }
}
