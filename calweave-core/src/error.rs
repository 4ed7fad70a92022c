//! Error types for calweave.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication failures reported by a provider.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("access denied")]
    AccessDenied,
}

/// Transport failures reported by a provider.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkError {
    #[error("offline")]
    Offline,

    #[error("rate limited")]
    RateLimited,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("event conflicts with the existing schedule")]
    Conflict,

    #[error("event could not be created: {0}")]
    CreateFailed(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("no free slot found within the search horizon")]
    NoSlotFound,

    #[error("requested time falls outside the representable calendar range")]
    OutOfRange,
}

/// Errors that can occur in calweave operations.
#[derive(Error, Debug)]
pub enum CalWeaveError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),

    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider '{0}' not found in PATH")]
    ProviderNotInstalled(String),

    #[error("Provider request timed out after {0}s")]
    ProviderTimeout(u64),

    #[error("No provider registered with id '{0}'")]
    ProviderNotFound(String),

    #[error("Calendar not found: {0}")]
    CalendarNotFound(String),

    #[error("Invalid event '{id}': {reason}")]
    InvalidEvent { id: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for calweave operations.
pub type CalWeaveResult<T> = Result<T, CalWeaveError>;
