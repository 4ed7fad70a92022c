//! Provider subprocess backend.
//!
//! Talks to an external provider binary (e.g. `calweave-provider-google`)
//! using JSON over stdin/stdout, one process per call. Any executable that
//! speaks the protocol in [`super::protocol`] can back a provider.
//!
//! Providers manage their own credentials and tokens; calweave only passes
//! the provider-specific parameters from config.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use crate::date_range::DateRange;
use crate::error::{CalWeaveError, CalWeaveResult};
use crate::event::{ProviderId, UnifiedCalendarEvent};
use crate::provider::protocol::{
    Authenticate, Command, CreateEvent, DeleteEvent, ListCalendars, ListEvents, ProviderCommand,
    RemoteParams, Request, Response, UpdateEvent,
};
use crate::provider::{AuthState, CalendarInfo, CalendarProvider, ProviderKind};

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);
/// Authentication may involve the user, so it gets much longer.
const AUTH_TIMEOUT: Duration = Duration::from_secs(300);

pub struct SubprocessProvider {
    id: ProviderId,
    kind: ProviderKind,
    name: String,
    params: RemoteParams,
}

impl SubprocessProvider {
    pub fn new(
        id: ProviderId,
        kind: ProviderKind,
        name: &str,
        params: HashMap<String, toml::Value>,
    ) -> Self {
        let params = params
            .into_iter()
            .filter_map(|(k, v)| serde_json::to_value(v).ok().map(|v| (k, v)))
            .collect();

        SubprocessProvider {
            id,
            kind,
            name: name.to_string(),
            params,
        }
    }

    pub fn binary_name(&self) -> String {
        format!("calweave-provider-{}", self.name)
    }

    fn binary_path(&self) -> CalWeaveResult<std::path::PathBuf> {
        let binary_name = self.binary_name();
        which::which(&binary_name).map_err(|_| CalWeaveError::ProviderNotInstalled(binary_name))
    }

    /// Call a typed provider command and return the result.
    ///
    /// The response type is inferred from the command's associated type.
    async fn call<C: ProviderCommand>(&self, cmd: C) -> CalWeaveResult<C::Response> {
        let limit = if C::command().is_interactive() {
            AUTH_TIMEOUT
        } else {
            PROVIDER_TIMEOUT
        };

        timeout(limit, self.call_raw(C::command(), cmd))
            .await
            .map_err(|_| CalWeaveError::ProviderTimeout(limit.as_secs()))?
    }

    /// Low-level call that sends a command with params and deserializes the response.
    async fn call_raw<P: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        command: Command,
        params: P,
    ) -> CalWeaveResult<R> {
        let params = serde_json::to_value(params)
            .map_err(|e| CalWeaveError::Serialization(e.to_string()))?;
        let request = Request { command, params };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| CalWeaveError::Serialization(e.to_string()))?;

        let binary_path = self.binary_path()?;
        tracing::debug!(provider = %self.id, ?command, binary = %binary_path.display(), "calling provider");

        // kill_on_drop: cancelling the call future must not leave the child running
        let mut child = TokioCommand::new(&binary_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CalWeaveError::Provider(format!(
                    "Failed to spawn {}: {}",
                    binary_path.display(),
                    e
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CalWeaveError::Provider("Provider stdin unavailable".into()))?;
        stdin
            .write_all(format!("{request_json}\n").as_bytes())
            .await?;
        drop(stdin);

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            return Err(CalWeaveError::Provider(format!(
                "Provider exited with status: {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        let response_str = String::from_utf8_lossy(&output.stdout);
        if response_str.trim().is_empty() {
            return Err(CalWeaveError::Provider(
                "Provider returned no response".into(),
            ));
        }

        let response: Response<R> = serde_json::from_str(&response_str)
            .map_err(|e| CalWeaveError::Provider(format!("Failed to parse response: {}", e)))?;

        response.into_result()
    }
}

#[async_trait]
impl CalendarProvider for SubprocessProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn authenticate(&self) -> CalWeaveResult<AuthState> {
        self.call(Authenticate {
            params: self.params.clone(),
        })
        .await
    }

    async fn fetch_events(&self, range: &DateRange) -> CalWeaveResult<Vec<UnifiedCalendarEvent>> {
        let mut events = self
            .call(ListEvents {
                params: self.params.clone(),
                from: range.from_rfc3339(),
                to: range.to_rfc3339(),
            })
            .await?;

        // The binary cannot know which id it was registered under
        for event in &mut events {
            event.provider = self.id.clone();
        }
        Ok(events)
    }

    async fn create_event(&self, draft: &UnifiedCalendarEvent) -> CalWeaveResult<String> {
        self.call(CreateEvent {
            params: self.params.clone(),
            event: draft.clone(),
        })
        .await
    }

    async fn update_event(&self, event: &UnifiedCalendarEvent) -> CalWeaveResult<()> {
        self.call(UpdateEvent {
            params: self.params.clone(),
            event: event.clone(),
        })
        .await
    }

    async fn delete_event(&self, event_id: &str) -> CalWeaveResult<()> {
        self.call(DeleteEvent {
            params: self.params.clone(),
            event_id: event_id.to_string(),
        })
        .await
    }

    async fn list_calendars(&self) -> CalWeaveResult<Vec<CalendarInfo>> {
        self.call(ListCalendars {
            params: self.params.clone(),
        })
        .await
    }
}
