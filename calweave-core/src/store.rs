//! Hand-off of finalized events to local persistence.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{CalWeaveError, CalWeaveResult};
use crate::event::UnifiedCalendarEvent;

/// Called once per event after a successful write-back.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn save(&self, event: &UnifiedCalendarEvent) -> CalWeaveResult<()>;
}

/// Discards everything.
#[derive(Debug, Clone, Default)]
pub struct NoopStore;

#[async_trait]
impl EventStore for NoopStore {
    async fn save(&self, _event: &UnifiedCalendarEvent) -> CalWeaveResult<()> {
        Ok(())
    }
}

/// One JSON file per event in a directory.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonDirStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Timed events: `YYYY-MM-DDTHHMM__slug`
    /// All-day events: `YYYY-MM-DD__slug`
    fn base_name_for(event: &UnifiedCalendarEvent) -> String {
        let title = slug::slugify(&event.title);
        let title = if title.is_empty() {
            "event".to_string()
        } else {
            title
        };

        let date = if event.start.is_date() {
            event.start_utc().format("%Y-%m-%d").to_string()
        } else {
            event.start_utc().format("%Y-%m-%dT%H%M").to_string()
        };

        format!("{}__{}", date, title)
    }

    /// Pick a file name that doesn't collide, trying -2, -3, ... suffixes.
    fn unique_path_for(&self, event: &UnifiedCalendarEvent) -> CalWeaveResult<PathBuf> {
        let base = Self::base_name_for(event);

        let path = self.dir.join(format!("{}.json", base));
        if !path.exists() {
            return Ok(path);
        }

        for n in 2..=100 {
            let path = self.dir.join(format!("{}-{}.json", base, n));
            if !path.exists() {
                return Ok(path);
            }
        }

        Err(CalWeaveError::Config(format!(
            "Too many event file name collisions for '{}'",
            base
        )))
    }
}

#[async_trait]
impl EventStore for JsonDirStore {
    async fn save(&self, event: &UnifiedCalendarEvent) -> CalWeaveResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.unique_path_for(event)?;
        let content = serde_json::to_string_pretty(event)
            .map_err(|e| CalWeaveError::Serialization(e.to_string()))?;

        // Write then rename so readers never see a partial file
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, &path).await?;

        tracing::debug!(event = %event.id, path = %path.display(), "saved event");
        Ok(())
    }
}
